//! Persistent set of record identities.

use crate::{PersistentMap, RecordIdentity};
use std::fmt;

/// A set of [`RecordIdentity`] values backed by a [`PersistentMap`].
///
/// Used for to-many relationship values. Cloning is O(1).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IdentitySet {
    members: PersistentMap<RecordIdentity, ()>,
}

impl IdentitySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check membership.
    pub fn contains(&self, identity: &RecordIdentity) -> bool {
        self.members.contains_key(identity)
    }

    /// Add a member. Returns `false` if it was already present.
    pub fn insert(&mut self, identity: RecordIdentity) -> bool {
        if self.contains(&identity) {
            return false;
        }
        self.members.insert(identity, ());
        true
    }

    /// Remove a member. Returns `false` if it was absent.
    pub fn remove(&mut self, identity: &RecordIdentity) -> bool {
        self.members.remove(identity).is_some()
    }

    /// Iterate over members.
    pub fn iter(&self) -> impl Iterator<Item = &RecordIdentity> + '_ {
        self.members.keys()
    }

    /// Set equality against a candidate list; duplicates in `candidates` are
    /// ignored.
    pub fn matches<'a>(&self, candidates: impl IntoIterator<Item = &'a RecordIdentity>) -> bool {
        let mut seen = IdentitySet::new();
        for candidate in candidates {
            if !self.contains(candidate) {
                return false;
            }
            seen.insert(candidate.clone());
        }
        seen.len() == self.len()
    }
}

impl FromIterator<RecordIdentity> for IdentitySet {
    fn from_iter<I: IntoIterator<Item = RecordIdentity>>(iter: I) -> Self {
        let mut set = Self::new();
        for identity in iter {
            set.insert(identity);
        }
        set
    }
}

impl fmt::Debug for IdentitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(id: &str) -> RecordIdentity {
        RecordIdentity::new("tag", id)
    }

    #[test]
    fn insert_and_remove() {
        let mut set = IdentitySet::new();
        assert!(set.insert(tag("a")));
        assert!(!set.insert(tag("a")));
        assert!(set.insert(tag("b")));
        assert_eq!(set.len(), 2);

        assert!(set.remove(&tag("a")));
        assert!(!set.remove(&tag("a")));
        assert!(!set.contains(&tag("a")));
        assert!(set.contains(&tag("b")));
    }

    #[test]
    fn clone_is_independent() {
        let base: IdentitySet = ["a", "b", "c"].into_iter().map(tag).collect();
        let mut fork = base.clone();
        fork.remove(&tag("b"));
        fork.insert(tag("d"));

        assert!(base.contains(&tag("b")));
        assert!(!base.contains(&tag("d")));
        assert_eq!(base.len(), 3);
        assert_eq!(fork.len(), 3);
    }

    #[test]
    fn matches_ignores_order_and_duplicates() {
        let set: IdentitySet = ["a", "b"].into_iter().map(tag).collect();
        assert!(set.matches(&[tag("b"), tag("a")]));
        assert!(set.matches(&[tag("a"), tag("b"), tag("a")]));
        assert!(!set.matches(&[tag("a")]));
        assert!(!set.matches(&[tag("a"), tag("b"), tag("c")]));
        assert!(IdentitySet::new().matches(&[]));
    }
}
