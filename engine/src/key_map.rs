//! Bidirectional index between primary ids and alternate keys.
//!
//! External systems often identify records by their own keys (a server-side
//! `remoteId`, say). The key map lets any component translate between the
//! two without scanning records. One key map may be shared by several caches.

use std::sync::Arc;

use dashmap::DashMap;

use crate::Record;

/// `(type, key name, lookup value)`
type Slot = (String, String, String);

/// Maps `(type, keyName, id) <-> (type, keyName, keyValue)`.
///
/// Thread-safe and can be shared across caches via `Arc`. Last write wins per
/// key name, and the two directions stay a bijection per key name.
#[derive(Debug, Default)]
pub struct KeyMap {
    ids_to_keys: DashMap<Slot, String>,
    keys_to_ids: DashMap<Slot, String>,
}

impl KeyMap {
    /// Create an empty key map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new key map wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Key value recorded for a primary id.
    pub fn id_to_key(&self, record_type: &str, key_name: &str, id: &str) -> Option<String> {
        self.ids_to_keys
            .get(&slot(record_type, key_name, id))
            .map(|entry| entry.value().clone())
    }

    /// Primary id recorded for a key value.
    pub fn key_to_id(&self, record_type: &str, key_name: &str, value: &str) -> Option<String> {
        self.keys_to_ids
            .get(&slot(record_type, key_name, value))
            .map(|entry| entry.value().clone())
    }

    /// Record every key carried by `record`.
    ///
    /// A new value replaces the id's previous one in both directions, and a
    /// value taken over from another id drops that id's entry. Empty values
    /// clear the key.
    pub fn push_record(&self, record: &Record) {
        for (key_name, value) in &record.keys {
            if value.is_empty() {
                self.remove_key(&record.record_type, key_name, &record.id);
                continue;
            }

            let previous = self.ids_to_keys.insert(
                slot(&record.record_type, key_name, &record.id),
                value.clone(),
            );
            if let Some(previous) = previous.filter(|previous| previous != value) {
                self.keys_to_ids.remove_if(
                    &slot(&record.record_type, key_name, &previous),
                    |_, id| *id == record.id,
                );
            }

            let displaced = self.keys_to_ids.insert(
                slot(&record.record_type, key_name, value),
                record.id.clone(),
            );
            if let Some(displaced) = displaced.filter(|id| *id != record.id) {
                self.ids_to_keys.remove_if(
                    &slot(&record.record_type, key_name, &displaced),
                    |_, key| key == value,
                );
            }
        }
    }

    /// Drop the key `key_name` recorded for `id`, in both directions.
    pub fn remove_key(&self, record_type: &str, key_name: &str, id: &str) {
        if let Some((_, value)) = self.ids_to_keys.remove(&slot(record_type, key_name, id)) {
            self.keys_to_ids
                .remove_if(&slot(record_type, key_name, &value), |_, owner| owner == id);
        }
    }

    /// Resolve a primary id from alternate keys.
    ///
    /// Keys are tried in the order the iterator yields them and the first hit
    /// wins. The caller controls that order: a record's own `keys` iterate
    /// alphabetically by key name, so pass an ordered list when a specific
    /// priority matters.
    pub fn id_from_keys<'a>(
        &self,
        record_type: &str,
        keys: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Option<String> {
        keys.into_iter()
            .find_map(|(key_name, value)| self.key_to_id(record_type, key_name, value))
    }

    /// Number of `(type, key name, id)` entries.
    pub fn len(&self) -> usize {
        self.ids_to_keys.len()
    }

    /// Check if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.ids_to_keys.is_empty()
    }

    /// Clear both directions.
    pub fn reset(&self) {
        self.ids_to_keys.clear();
        self.keys_to_ids.clear();
    }
}

fn slot(record_type: &str, key_name: &str, value: &str) -> Slot {
    (
        record_type.to_string(),
        key_name.to_string(),
        value.to_string(),
    )
}
