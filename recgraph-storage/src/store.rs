//! Flat key → entry map.
//!
//! The store is a plain arena: entries refer to each other only through
//! keys, so there is no shared ownership and no back-pointer to keep in
//! sync. Deleting an entry never touches the entries it links to.

use std::collections::{BTreeMap, HashMap};

use recgraph_core::{Entry, RecordEntry, Timestamp};

/// Read access to a set of entries.
///
/// Implemented by the live [`EntryStore`] and by plain maps, so that the
/// same traversal code runs over the in-memory store and over a durable
/// batch.
pub trait EntrySource {
    fn entry(&self, key: &str) -> Option<&Entry>;
}

impl EntrySource for BTreeMap<String, Entry> {
    fn entry(&self, key: &str) -> Option<&Entry> {
        self.get(key)
    }
}

impl EntrySource for HashMap<String, Entry> {
    fn entry(&self, key: &str) -> Option<&Entry> {
        self.get(key)
    }
}

/// TTL bookkeeping for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    pub ingested_at: Timestamp,
    pub expires_at: Timestamp,
}

/// In-memory entry store.
#[derive(Debug, Default, Clone)]
pub struct EntryStore {
    entries: HashMap<String, Entry>,
    metadata: HashMap<String, EntryMetadata>,
}

impl EntryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.entries.get_mut(key)
    }

    /// Store an entry wholesale, replacing whatever was there.
    pub fn put(&mut self, key: impl Into<String>, entry: Entry) {
        self.entries.insert(key.into(), entry);
    }

    /// Remove an entry and its metadata. Linked entries are left alone.
    pub fn delete(&mut self, key: &str) -> Option<Entry> {
        self.metadata.remove(key);
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Look up a record entry by key.
    pub fn record(&self, key: &str) -> Option<&RecordEntry> {
        self.entries.get(key).and_then(Entry::as_record)
    }

    /// All record entries with their keys, sorted by key.
    pub fn records(&self) -> Vec<(&str, &RecordEntry)> {
        let mut records: Vec<(&str, &RecordEntry)> = self
            .entries
            .iter()
            .filter_map(|(k, e)| e.as_record().map(|r| (k.as_str(), r)))
            .collect();
        records.sort_unstable_by(|a, b| a.0.cmp(b.0));
        records
    }

    /// Snapshot of every entry, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, Entry> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }

    /// Keys of the entries holding a resolved link to `key`, sorted.
    pub fn referrers(&self, key: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.links().iter().any(|l| l.key() == Some(key)))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn metadata(&self, key: &str) -> Option<EntryMetadata> {
        self.metadata.get(key).copied()
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, metadata: EntryMetadata) {
        self.metadata.insert(key.into(), metadata);
    }

    /// Keys whose expiration is at or before `now`, sorted.
    pub fn expired_keys(&self, now: Timestamp) -> Vec<String> {
        let mut keys: Vec<String> = self
            .metadata
            .iter()
            .filter(|(_, m)| m.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Drop every entry and all metadata.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.metadata.clear();
    }
}

impl EntrySource for EntryStore {
    fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }
}
