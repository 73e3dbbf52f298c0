//! Persistent hash map with structural sharing.
//!
//! A hash array mapped trie whose nodes live behind [`Arc`]. Cloning a map is
//! O(1); a write copies only the nodes on the path to the touched key, so a
//! handle cloned earlier keeps observing exactly the state it was cloned from.
//!
//! Lookups and writes are O(log32 n). Keys whose 64-bit hashes collide share a
//! collision bucket at the bottom of the trie.

use serde::ser::{Serialize, Serializer};
use std::borrow::Borrow;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const BITS: u32 = 5;
const MASK: u64 = (1 << BITS) - 1;

struct Pair<K, V> {
    key: K,
    value: V,
}

enum Entry<K, V> {
    Leaf { hash: u64, pair: Arc<Pair<K, V>> },
    Branch(Arc<Branch<K, V>>),
    Collision(Arc<Collision<K, V>>),
}

// Manual impls: cloning an entry clones `Arc`s only, so no `K: Clone` or
// `V: Clone` bound is needed.
impl<K, V> Clone for Entry<K, V> {
    fn clone(&self) -> Self {
        match self {
            Entry::Leaf { hash, pair } => Entry::Leaf {
                hash: *hash,
                pair: Arc::clone(pair),
            },
            Entry::Branch(branch) => Entry::Branch(Arc::clone(branch)),
            Entry::Collision(collision) => Entry::Collision(Arc::clone(collision)),
        }
    }
}

struct Branch<K, V> {
    bitmap: u32,
    entries: Vec<Entry<K, V>>,
}

impl<K, V> Clone for Branch<K, V> {
    fn clone(&self) -> Self {
        Self {
            bitmap: self.bitmap,
            entries: self.entries.clone(),
        }
    }
}

impl<K, V> Branch<K, V> {
    fn empty() -> Self {
        Self {
            bitmap: 0,
            entries: Vec::new(),
        }
    }

    fn position(&self, bit: u32) -> usize {
        (self.bitmap & (bit - 1)).count_ones() as usize
    }

    /// Place an entry into a slot known to be free.
    fn place(&mut self, shift: u32, hash: u64, entry: Entry<K, V>) {
        let bit = fragment(hash, shift);
        let pos = self.position(bit);
        self.entries.insert(pos, entry);
        self.bitmap |= bit;
    }
}

struct Collision<K, V> {
    hash: u64,
    pairs: Vec<Arc<Pair<K, V>>>,
}

impl<K, V> Clone for Collision<K, V> {
    fn clone(&self) -> Self {
        Self {
            hash: self.hash,
            pairs: self.pairs.clone(),
        }
    }
}

enum Shrink<K, V> {
    Keep,
    Drop,
    Replace(Entry<K, V>),
}

fn hash_key<Q: Hash + ?Sized>(key: &Q) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn fragment(hash: u64, shift: u32) -> u32 {
    1 << ((hash >> shift) & MASK)
}

fn key_matches<K: Borrow<Q>, Q: Eq + ?Sized>(stored: &K, key: &Q) -> bool {
    <K as Borrow<Q>>::borrow(stored) == key
}

fn unwrap_value<K, V: Clone>(pair: Arc<Pair<K, V>>) -> V {
    match Arc::try_unwrap(pair) {
        Ok(pair) => pair.value,
        Err(shared) => shared.value.clone(),
    }
}

fn insert_into<K: Eq, V>(
    branch: &mut Branch<K, V>,
    shift: u32,
    hash: u64,
    pair: Arc<Pair<K, V>>,
) -> Option<Arc<Pair<K, V>>> {
    let bit = fragment(hash, shift);
    let pos = branch.position(bit);

    if branch.bitmap & bit == 0 {
        branch.entries.insert(pos, Entry::Leaf { hash, pair });
        branch.bitmap |= bit;
        return None;
    }

    match &mut branch.entries[pos] {
        Entry::Leaf {
            hash: existing_hash,
            pair: existing,
        } => {
            if *existing_hash == hash && existing.key == pair.key {
                return Some(std::mem::replace(existing, pair));
            }
            let existing_hash = *existing_hash;
            let existing = Arc::clone(existing);
            let entry = if existing_hash == hash {
                Entry::Collision(Arc::new(Collision {
                    hash,
                    pairs: vec![existing, pair],
                }))
            } else {
                // Hashes differ, so some deeper 5-bit fragment separates them.
                let mut sub = Branch::empty();
                sub.place(
                    shift + BITS,
                    existing_hash,
                    Entry::Leaf {
                        hash: existing_hash,
                        pair: existing,
                    },
                );
                insert_into(&mut sub, shift + BITS, hash, pair);
                Entry::Branch(Arc::new(sub))
            };
            branch.entries[pos] = entry;
            None
        }
        Entry::Branch(next) => insert_into(Arc::make_mut(next), shift + BITS, hash, pair),
        Entry::Collision(collision) => {
            if collision.hash == hash {
                let collision = Arc::make_mut(collision);
                if let Some(slot) = collision.pairs.iter_mut().find(|p| p.key == pair.key) {
                    return Some(std::mem::replace(slot, pair));
                }
                collision.pairs.push(pair);
                return None;
            }
            let collision_hash = collision.hash;
            let mut sub = Branch::empty();
            sub.place(
                shift + BITS,
                collision_hash,
                Entry::Collision(Arc::clone(collision)),
            );
            insert_into(&mut sub, shift + BITS, hash, pair);
            branch.entries[pos] = Entry::Branch(Arc::new(sub));
            None
        }
    }
}

fn remove_from<K, V, Q>(
    branch: &mut Branch<K, V>,
    shift: u32,
    hash: u64,
    key: &Q,
) -> Option<Arc<Pair<K, V>>>
where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
{
    let bit = fragment(hash, shift);
    if branch.bitmap & bit == 0 {
        return None;
    }
    let pos = branch.position(bit);

    let (removed, shrink) = match &mut branch.entries[pos] {
        Entry::Leaf { pair, .. } => {
            if !key_matches(&pair.key, key) {
                return None;
            }
            (Arc::clone(pair), Shrink::Drop)
        }
        Entry::Branch(next) => {
            let next = Arc::make_mut(next);
            let removed = remove_from(next, shift + BITS, hash, key)?;
            let shrink = match next.entries.len() {
                0 => Shrink::Drop,
                1 if !matches!(next.entries[0], Entry::Branch(_)) => {
                    Shrink::Replace(next.entries[0].clone())
                }
                _ => Shrink::Keep,
            };
            (removed, shrink)
        }
        Entry::Collision(collision) => {
            let idx = collision
                .pairs
                .iter()
                .position(|p| key_matches(&p.key, key))?;
            let collision = Arc::make_mut(collision);
            let removed = collision.pairs.remove(idx);
            let shrink = if collision.pairs.len() == 1 {
                Shrink::Replace(Entry::Leaf {
                    hash: collision.hash,
                    pair: Arc::clone(&collision.pairs[0]),
                })
            } else {
                Shrink::Keep
            };
            (removed, shrink)
        }
    };

    match shrink {
        Shrink::Keep => {}
        Shrink::Drop => {
            branch.entries.remove(pos);
            branch.bitmap &= !bit;
        }
        Shrink::Replace(entry) => branch.entries[pos] = entry,
    }
    Some(removed)
}

/// A persistent (immutable, structurally shared) hash map.
///
/// `clone` is a fork: both handles share every node until one of them writes.
pub struct PersistentMap<K, V> {
    root: Arc<Branch<K, V>>,
    len: usize,
}

impl<K, V> PersistentMap<K, V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            root: Arc::new(Branch::empty()),
            len: 0,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether two handles share the same root, i.e. neither has diverged.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
    }

    /// Iterate over entries in trie order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            stack: vec![self.root.entries.iter()],
            collision: [].iter(),
            remaining: self.len,
        }
    }

    /// Iterate over keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    /// Iterate over values.
    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }
}

impl<K: Hash + Eq, V> PersistentMap<K, V> {
    /// Look up a value.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_key(key);
        let mut branch: &Branch<K, V> = &self.root;
        let mut shift = 0;
        loop {
            let bit = fragment(hash, shift);
            if branch.bitmap & bit == 0 {
                return None;
            }
            match &branch.entries[branch.position(bit)] {
                Entry::Leaf { pair, .. } => {
                    return key_matches(&pair.key, key).then_some(&pair.value);
                }
                Entry::Branch(next) => {
                    branch = next;
                    shift += BITS;
                }
                Entry::Collision(collision) => {
                    return collision
                        .pairs
                        .iter()
                        .find(|p| key_matches(&p.key, key))
                        .map(|p| &p.value);
                }
            }
        }
    }

    /// Check if a key is present.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }
}

impl<K: Hash + Eq, V: Clone> PersistentMap<K, V> {
    /// Insert a value, returning the previous one.
    ///
    /// Only nodes on the path to `key` are copied, and only if shared with
    /// another handle.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = hash_key(&key);
        let pair = Arc::new(Pair { key, value });
        let previous = insert_into(Arc::make_mut(&mut self.root), 0, hash, pair);
        if previous.is_none() {
            self.len += 1;
        }
        previous.map(unwrap_value)
    }

    /// Remove a key, returning its value.
    ///
    /// Removing an absent key leaves the map untouched and still shared.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.contains_key(key) {
            return None;
        }
        let hash = hash_key(key);
        let removed = remove_from(Arc::make_mut(&mut self.root), 0, hash, key)?;
        self.len -= 1;
        Some(unwrap_value(removed))
    }

    /// A new handle with `key` set; `self` is unchanged.
    pub fn update(&self, key: K, value: V) -> Self {
        let mut next = self.clone();
        next.insert(key, value);
        next
    }

    /// A new handle without `key`; `self` is unchanged.
    pub fn without<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut next = self.clone();
        next.remove(key);
        next
    }
}

impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: Arc::clone(&self.root),
            len: self.len,
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Hash + Eq, V: PartialEq> PartialEq for PersistentMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.len == other.len && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Hash + Eq, V: Eq> Eq for PersistentMap<K, V> {}

impl<K: Hash + Eq, V: Clone> FromIterator<(K, V)> for PersistentMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K: Hash + Eq, V: Clone> Extend<(K, V)> for PersistentMap<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<'a, K, V> IntoIterator for &'a PersistentMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Serialize, V: Serialize> Serialize for PersistentMap<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// Borrowing iterator over a [`PersistentMap`].
pub struct Iter<'a, K, V> {
    stack: Vec<std::slice::Iter<'a, Entry<K, V>>>,
    collision: std::slice::Iter<'a, Arc<Pair<K, V>>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pair) = self.collision.next() {
                self.remaining -= 1;
                return Some((&pair.key, &pair.value));
            }
            match self.stack.last_mut()?.next() {
                None => {
                    self.stack.pop();
                }
                Some(Entry::Leaf { pair, .. }) => {
                    self.remaining -= 1;
                    return Some((&pair.key, &pair.value));
                }
                Some(Entry::Branch(branch)) => self.stack.push(branch.entries.iter()),
                Some(Entry::Collision(collision)) => self.collision = collision.pairs.iter(),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
