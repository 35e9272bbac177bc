//! Durable store boundary.
//!
//! The graph persists entries through a [`DurableStore`]. Backends only
//! see opaque JSON blobs keyed by strings; the record-aware wrapper in
//! [`record_aware`] is what gives record and field keys their meaning.

pub mod lmdb;
pub mod record;
pub mod record_aware;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use recgraph_core::{GraphResult, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub use lmdb::LmdbDurableStore;
pub use record::{denormalize, normalize, DurableField, DurableRecord, DurableValue};
pub use record_aware::{LoadedRecords, RecordAwareDurableStore};

/// Freshness window of a persisted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableExpiration {
    /// Entry is fresh until this time.
    pub fresh: Timestamp,
    /// Entry may be served stale until this time.
    pub stale: Timestamp,
}

/// One persisted blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableEntry {
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DurableExpiration>,
}

impl DurableEntry {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            expiration: None,
        }
    }

    pub fn with_expiration(mut self, expiration: DurableExpiration) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

pub type DurableEntries = BTreeMap<String, DurableEntry>;

/// Asynchronous key/blob persistence.
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch the given keys. Absent keys are left out of the result;
    /// `None` means none of them were found.
    async fn get_entries(&self, keys: &[String]) -> GraphResult<Option<DurableEntries>>;

    /// Write every entry, replacing what was stored under its key.
    async fn set_entries(&self, entries: DurableEntries) -> GraphResult<()>;

    /// Remove the given keys. Absent keys are ignored.
    async fn evict_entries(&self, keys: &[String]) -> GraphResult<()>;
}

#[async_trait]
impl<D: DurableStore + ?Sized> DurableStore for Arc<D> {
    async fn get_entries(&self, keys: &[String]) -> GraphResult<Option<DurableEntries>> {
        (**self).get_entries(keys).await
    }

    async fn set_entries(&self, entries: DurableEntries) -> GraphResult<()> {
        (**self).set_entries(entries).await
    }

    async fn evict_entries(&self, keys: &[String]) -> GraphResult<()> {
        (**self).evict_entries(keys).await
    }
}

// ============================================================================
// IN-MEMORY BACKEND
// ============================================================================

/// In-memory durable store.
///
/// Uses `tokio::sync::RwLock` for async access. Every key passed to
/// `get_entries` is appended to a read log so callers can check how often
/// a key was fetched.
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    entries: RwLock<DurableEntries>,
    read_log: RwLock<Vec<String>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything stored.
    pub async fn snapshot(&self) -> DurableEntries {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Every key requested through `get_entries`, in request order.
    pub async fn read_log(&self) -> Vec<String> {
        self.read_log.read().await.clone()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn get_entries(&self, keys: &[String]) -> GraphResult<Option<DurableEntries>> {
        self.read_log.write().await.extend(keys.iter().cloned());
        let entries = self.entries.read().await;
        let found: DurableEntries = keys
            .iter()
            .filter_map(|k| entries.get(k).map(|e| (k.clone(), e.clone())))
            .collect();
        Ok((!found.is_empty()).then_some(found))
    }

    async fn set_entries(&self, entries: DurableEntries) -> GraphResult<()> {
        self.entries.write().await.extend(entries);
        Ok(())
    }

    async fn evict_entries(&self, keys: &[String]) -> GraphResult<()> {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}
