//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped
//! key-value store that survives process restarts.
//!
//! # Value layout
//!
//! `[written_at_ms: 8 bytes LE][json DurableEntry]`
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads share one read transaction per
//! batch; `set_entries` and `evict_entries` each commit a single write
//! transaction, so a batch is applied entirely or not at all.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use recgraph_core::{DurableStoreError, GraphResult};

use super::{DurableEntries, DurableEntry, DurableStore};

const TIMESTAMP_LEN: usize = 8;

fn backend_error(operation: &str, e: impl std::fmt::Display) -> DurableStoreError {
    DurableStoreError::Backend {
        operation: operation.to_string(),
        reason: e.to_string(),
    }
}

/// LMDB-backed durable store.
pub struct LmdbDurableStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl std::fmt::Debug for LmdbDurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbDurableStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbDurableStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> GraphResult<Self> {
        std::fs::create_dir_all(&path).map_err(|e| backend_error("create_dir", e))?;

        // SAFETY: the environment is opened once per path by this process and
        // never concurrently re-opened with different options.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| backend_error("env_open", e))?;

        let mut wtxn = env.write_txn().map_err(|e| backend_error("write_txn", e))?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| backend_error("create_database", e))?;
        wtxn.commit().map_err(|e| backend_error("commit", e))?;

        Ok(Self { env, db })
    }

    /// When `key` was last written.
    pub fn written_at(&self, key: &str) -> GraphResult<Option<DateTime<Utc>>> {
        let rtxn = self.env.read_txn().map_err(|e| backend_error("read_txn", e))?;
        let Some(bytes) = self
            .db
            .get(&rtxn, key.as_bytes())
            .map_err(|e| backend_error("get", e))?
        else {
            return Ok(None);
        };
        Ok(decode_value(key, bytes)?.map(|(written_at, _)| written_at))
    }

    /// Number of stored keys.
    pub fn len(&self) -> GraphResult<u64> {
        let rtxn = self.env.read_txn().map_err(|e| backend_error("read_txn", e))?;
        Ok(self.db.len(&rtxn).map_err(|e| backend_error("len", e))?)
    }

    pub fn is_empty(&self) -> GraphResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn encode_value(key: &str, entry: &DurableEntry, written_at: DateTime<Utc>) -> GraphResult<Vec<u8>> {
    let json = serde_json::to_vec(entry).map_err(|e| DurableStoreError::Codec {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    let mut bytes = Vec::with_capacity(TIMESTAMP_LEN + json.len());
    bytes.extend_from_slice(&written_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode a stored value. Values too short to hold the header are skipped.
fn decode_value(key: &str, bytes: &[u8]) -> GraphResult<Option<(DateTime<Utc>, DurableEntry)>> {
    if bytes.len() < TIMESTAMP_LEN {
        tracing::warn!(key, len = bytes.len(), "skipping truncated durable value");
        return Ok(None);
    }
    let (header, json) = bytes.split_at(TIMESTAMP_LEN);
    let header: [u8; TIMESTAMP_LEN] =
        header
            .try_into()
            .map_err(|_| DurableStoreError::Corrupt {
                key: key.to_string(),
                reason: "invalid timestamp header".to_string(),
            })?;
    let written_at = DateTime::from_timestamp_millis(i64::from_le_bytes(header))
        .unwrap_or_default();
    let entry = serde_json::from_slice(json).map_err(|e| DurableStoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some((written_at, entry)))
}

#[async_trait]
impl DurableStore for LmdbDurableStore {
    async fn get_entries(&self, keys: &[String]) -> GraphResult<Option<DurableEntries>> {
        let rtxn = self.env.read_txn().map_err(|e| backend_error("read_txn", e))?;
        let mut found = DurableEntries::new();
        for key in keys {
            let bytes = self
                .db
                .get(&rtxn, key.as_bytes())
                .map_err(|e| backend_error("get", e))?;
            if let Some(bytes) = bytes {
                if let Some((_, entry)) = decode_value(key, bytes)? {
                    found.insert(key.clone(), entry);
                }
            }
        }
        Ok((!found.is_empty()).then_some(found))
    }

    async fn set_entries(&self, entries: DurableEntries) -> GraphResult<()> {
        let now = Utc::now();
        let encoded = entries
            .iter()
            .map(|(key, entry)| encode_value(key, entry, now).map(|v| (key, v)))
            .collect::<GraphResult<Vec<_>>>()?;

        let mut wtxn = self.env.write_txn().map_err(|e| backend_error("write_txn", e))?;
        for (key, value) in &encoded {
            self.db
                .put(&mut wtxn, key.as_bytes(), value)
                .map_err(|e| backend_error("put", e))?;
        }
        wtxn.commit().map_err(|e| backend_error("commit", e))?;
        tracing::debug!(count = encoded.len(), "lmdb write committed");
        Ok(())
    }

    async fn evict_entries(&self, keys: &[String]) -> GraphResult<()> {
        let mut wtxn = self.env.write_txn().map_err(|e| backend_error("write_txn", e))?;
        let mut deleted = 0usize;
        for key in keys {
            if self
                .db
                .delete(&mut wtxn, key.as_bytes())
                .map_err(|e| backend_error("delete", e))?
            {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(|e| backend_error("commit", e))?;
        tracing::debug!(requested = keys.len(), deleted, "lmdb eviction committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbDurableStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store =
            LmdbDurableStore::open(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    fn batch(pairs: &[(&str, serde_json::Value)]) -> DurableEntries {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), DurableEntry::new(v.clone())))
            .collect()
    }

    #[tokio::test]
    async fn test_lmdb_set_get_evict() {
        let (store, _dir) = create_test_store();
        store
            .set_entries(batch(&[("a", json!({"x": 1})), ("b", json!("y"))]))
            .await
            .unwrap();
        assert_eq!(store.len().unwrap(), 2);

        let got = store
            .get_entries(&["a".to_string(), "nope".to_string()])
            .await
            .unwrap()
            .expect("found");
        assert_eq!(got["a"].data, json!({"x": 1}));
        assert!(!got.contains_key("nope"));
        assert!(store.written_at("a").unwrap().is_some());

        store.evict_entries(&["a".to_string(), "b".to_string()]).await.unwrap();
        assert!(store.is_empty().unwrap());
        assert!(store
            .get_entries(&["a".to_string()])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lmdb_survives_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let store = LmdbDurableStore::open(temp_dir.path(), 10).unwrap();
            store.set_entries(batch(&[("k", json!(42))])).await.unwrap();
        }
        let store = LmdbDurableStore::open(temp_dir.path(), 10).unwrap();
        let got = store.get_entries(&["k".to_string()]).await.unwrap().unwrap();
        assert_eq!(got["k"].data, json!(42));
    }

    #[test]
    fn test_value_layout() {
        let written_at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let entry = DurableEntry::new(json!([1, 2]));
        let bytes = encode_value("k", &entry, written_at).unwrap();
        assert_eq!(&bytes[..8], &1_700_000_000_000i64.to_le_bytes());
        let (at, back) = decode_value("k", &bytes).unwrap().unwrap();
        assert_eq!(at, written_at);
        assert_eq!(back, entry);

        assert!(decode_value("k", &bytes[..4]).unwrap().is_none());
        assert!(decode_value("k", &[0u8; 9]).is_err());
    }
}
