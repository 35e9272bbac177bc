//! Record graph facade.
//!
//! One [`RecordGraph`] per environment or session. It owns the in-memory
//! [`EntryStore`], emits changes after each ingest, and writes through a
//! [`RecordAwareDurableStore`] when flushed.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use recgraph_core::{
    key_for_record, owning_record_key, parse_key, DurableStoreError, Entry, FieldValue,
    GraphConfig, GraphResult, IngestPath, KeyKind, Timestamp,
};
use serde_json::Value;

use crate::durable::{
    DurableEntries, DurableEntry, DurableExpiration, DurableStore, RecordAwareDurableStore,
};
use crate::emit::{ChangeEmitter, ChangedRecords, EntityMetadataMap, ListenerId, ObjectInfoProvider};
use crate::field_state;
use crate::ingest::{IngestEnv, IngestReport, Ingester};
use crate::instrumentation::{Instrumentation, TracingInstrumentation};
use crate::read::{read_record, RecordView};
use crate::store::{EntryMetadata, EntrySource, EntryStore};

/// Normalized record cache with change emission and durable write-through.
pub struct RecordGraph<D: DurableStore> {
    store: EntryStore,
    config: GraphConfig,
    instrumentation: Arc<dyn Instrumentation>,
    emitter: ChangeEmitter,
    durable: RecordAwareDurableStore<D>,
    /// Keys written since the last flush.
    dirty: BTreeSet<String>,
    /// Keys removed from memory since the last flush.
    removed: BTreeSet<String>,
}

impl<D: DurableStore> fmt::Debug for RecordGraph<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordGraph")
            .field("entries", &self.store.len())
            .field("config", &self.config)
            .field("dirty", &self.dirty.len())
            .field("removed", &self.removed.len())
            .finish()
    }
}

impl<D: DurableStore> RecordGraph<D> {
    /// Create a graph that reports instrumentation events through `tracing`.
    pub fn new(durable: D, config: GraphConfig) -> GraphResult<Self> {
        Self::with_instrumentation(durable, config, Arc::new(TracingInstrumentation))
    }

    pub fn with_instrumentation(
        durable: D,
        config: GraphConfig,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> GraphResult<Self> {
        config.validate()?;
        let emitter = ChangeEmitter::new(&config, Arc::clone(&instrumentation))?;
        Ok(Self {
            store: EntryStore::new(),
            config,
            instrumentation,
            emitter,
            durable: RecordAwareDurableStore::new(durable),
            dirty: BTreeSet::new(),
            removed: BTreeSet::new(),
        })
    }

    pub fn with_object_info(mut self, provider: Arc<dyn ObjectInfoProvider>) -> Self {
        self.emitter = self.emitter.with_object_info(provider);
        self
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn durable(&self) -> &RecordAwareDurableStore<D> {
        &self.durable
    }

    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.store.get(key)
    }

    /// Keys waiting to be written by [`RecordGraph::flush`].
    pub fn dirty_keys(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    // ========================================================================
    // INGEST AND EMISSION
    // ========================================================================

    /// Ingest a payload and notify listeners of the records it changed.
    pub fn ingest(
        &mut self,
        ingester: &Ingester,
        payload: &Value,
        path: &IngestPath,
        timestamp: Timestamp,
    ) -> IngestReport {
        let env = IngestEnv::new(&self.config, self.instrumentation.as_ref());
        let report = ingester.ingest(payload, path, &mut self.store, &env, timestamp);

        for key in &report.changed_keys {
            if self.store.contains(key) {
                self.removed.remove(key);
                self.dirty.insert(key.clone());
            } else {
                self.dirty.remove(key);
                self.removed.insert(key.clone());
            }
        }
        self.emitter
            .emit(report.changed_records.iter().map(String::as_str), &self.store);
        report
    }

    pub fn on_change<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&ChangedRecords, &EntityMetadataMap) + Send + Sync + 'static,
    {
        self.emitter.on_change(listener)
    }

    pub fn off_change(&mut self, id: ListenerId) -> bool {
        self.emitter.off_change(id)
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn read_record(&self, id: &str) -> Option<RecordView> {
        read_record(
            &self.store,
            &key_for_record(id),
            self.config.max_spanning_depth,
            self.instrumentation.as_ref(),
        )
    }

    /// `ApiName.Field` for every non-spanning field known for the record.
    ///
    /// Falls back to the durable store when the record is not in memory.
    pub async fn get_tracked_fields_for_record(&self, id: &str) -> GraphResult<Vec<String>> {
        let record_key = key_for_record(id);
        if self.store.record(&record_key).is_some() {
            return Ok(tracked_fields(&self.store, &record_key));
        }
        let entries = self
            .durable
            .get_record_entries(std::slice::from_ref(&record_key))
            .await?;
        Ok(tracked_fields(&entries, &record_key))
    }

    // ========================================================================
    // FIELD STATE
    // ========================================================================

    pub fn mark_pending(&mut self, field_key: &str) -> bool {
        let changed = field_state::mark_pending(&mut self.store, field_key);
        if changed {
            self.dirty.insert(field_key.to_string());
        }
        changed
    }

    /// Mark every present field of a record pending. Returns how many changed.
    pub fn mark_record_pending(&mut self, record_id: &str) -> usize {
        let changed = field_state::mark_record_pending(&mut self.store, &key_for_record(record_id));
        let count = changed.len();
        self.dirty.extend(changed);
        count
    }

    /// Mark the scalar fields of every record whose freshness ended by `now`
    /// pending. Spanning fields stay present; their targets expire on their
    /// own metadata.
    ///
    /// Returns how many fields changed.
    pub fn expire_stale(&mut self, now: Timestamp) -> usize {
        let expired: Vec<String> = self
            .store
            .expired_keys(now)
            .into_iter()
            .filter(|k| matches!(parse_key(k), KeyKind::Record { .. }))
            .collect();
        let mut count = 0;
        for record_key in expired {
            let changed = field_state::mark_record_stale(&mut self.store, &record_key);
            count += changed.len();
            self.dirty.extend(changed);
        }
        if count > 0 {
            tracing::debug!(fields = count, now, "expired records marked pending");
        }
        count
    }

    // ========================================================================
    // DURABLE
    // ========================================================================

    /// Remove a key from memory and from the durable store.
    ///
    /// Evicting a record also drops its field values and turns every link
    /// to it into a missing placeholder; evicting a field unlinks it from
    /// its record.
    pub async fn evict(&mut self, key: &str) -> GraphResult<()> {
        let is_record = match parse_key(key) {
            KeyKind::Record { .. } => {
                if let Some(record) = self.store.record(key).cloned() {
                    for field_key in record.fields.values().filter_map(|l| l.key()) {
                        self.store.delete(field_key);
                        self.dirty.remove(field_key);
                    }
                }
                true
            }
            KeyKind::Field { record_key, field } => {
                if let Some(record) = self.store.get_mut(record_key).and_then(Entry::as_record_mut)
                {
                    record.fields.remove(field);
                }
                false
            }
            KeyKind::Other => false,
        };
        self.store.delete(key);
        self.dirty.remove(key);
        self.removed.remove(key);
        if is_record {
            let unlinked = field_state::unlink_removed(&mut self.store, key);
            if !unlinked.is_empty() {
                tracing::debug!(
                    record_key = %key,
                    referrers = unlinked.len(),
                    "unlinked evicted record"
                );
            }
            self.dirty.extend(unlinked);
        }
        self.durable.evict_entries(&[key.to_string()]).await
    }

    /// Write every dirty key through the durable adapter and evict keys
    /// removed from memory. Returns how many keys were written.
    pub async fn flush(&mut self) -> GraphResult<usize> {
        let mut keys: BTreeSet<String> = BTreeSet::new();
        for key in &self.dirty {
            match owning_record_key(key) {
                // A record is always persisted whole.
                Some(record_key) => {
                    if let Some(record) = self.store.record(record_key) {
                        keys.insert(record_key.to_string());
                        keys.extend(record.fields.values().filter_map(|l| l.key()).map(str::to_string));
                    }
                }
                None => {
                    keys.insert(key.clone());
                }
            }
        }

        let mut batch = DurableEntries::new();
        for key in &keys {
            let Some(entry) = self.store.get(key) else {
                continue;
            };
            let data = serde_json::to_value(entry).map_err(|e| DurableStoreError::Codec {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            let mut durable = DurableEntry::new(data);
            if let Some(meta) = self.store.metadata(key) {
                durable = durable.with_expiration(DurableExpiration {
                    fresh: meta.expires_at,
                    stale: meta.expires_at.saturating_add(self.config.stale_ttl_ms()),
                });
            }
            batch.insert(key.clone(), durable);
        }

        let written = batch.len();
        if !batch.is_empty() {
            self.durable.set_entries(batch).await?;
        }
        if !self.removed.is_empty() {
            let removed: Vec<String> = self.removed.iter().cloned().collect();
            self.durable.evict_entries(&removed).await?;
        }
        tracing::debug!(written, evicted = self.removed.len(), "flushed record graph");
        self.dirty.clear();
        self.removed.clear();
        Ok(written)
    }

    /// Load keys absent from memory out of the durable store.
    ///
    /// Record and field keys bring their whole record back, nested records
    /// included. Entries already in memory are never overwritten. Returns
    /// how many entries were loaded.
    pub async fn hydrate(&mut self, keys: &[String]) -> GraphResult<usize> {
        let mut record_keys = BTreeSet::new();
        let mut other_keys = Vec::new();
        for key in keys.iter().filter(|k| !self.store.contains(k)) {
            match owning_record_key(key) {
                Some(record_key) => {
                    record_keys.insert(record_key.to_string());
                }
                None => other_keys.push(key.clone()),
            }
        }

        let mut loaded = 0;
        let record_keys: Vec<String> = record_keys.into_iter().collect();
        if !record_keys.is_empty() {
            let records = self.durable.load_records(&record_keys).await?;
            for (key, entry) in records.entries.iter() {
                if self.store.contains(key) {
                    continue;
                }
                if let Some(expiration) = records.expiration_for(key) {
                    let metadata = self.metadata_from(expiration);
                    self.store.set_metadata(key.clone(), metadata);
                }
                self.store.put(key.clone(), entry.clone());
                loaded += 1;
            }
        }

        if !other_keys.is_empty() {
            if let Some(found) = self.durable.get_entries(&other_keys).await? {
                for (key, durable) in found {
                    let entry: Entry = serde_json::from_value(durable.data).map_err(|e| {
                        DurableStoreError::Corrupt {
                            key: key.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    if let Some(expiration) = durable.expiration {
                        let metadata = self.metadata_from(expiration);
                        self.store.set_metadata(key.clone(), metadata);
                    }
                    self.store.put(key, entry);
                    loaded += 1;
                }
            }
        }
        tracing::debug!(requested = keys.len(), loaded, "hydrated record graph");
        Ok(loaded)
    }

    fn metadata_from(&self, expiration: DurableExpiration) -> EntryMetadata {
        EntryMetadata {
            ingested_at: expiration.fresh.saturating_sub(self.config.record_ttl_ms()),
            expires_at: expiration.fresh,
        }
    }
}

fn tracked_fields<S: EntrySource + ?Sized>(source: &S, record_key: &str) -> Vec<String> {
    let Some(record) = source.entry(record_key).and_then(Entry::as_record) else {
        return Vec::new();
    };
    record
        .fields
        .iter()
        .filter(|(_, link)| {
            !link
                .key()
                .and_then(|k| source.entry(k))
                .and_then(Entry::as_field_value)
                .is_some_and(|f| matches!(f.value, FieldValue::Record(_)))
        })
        .map(|(name, _)| format!("{}.{}", record.api_name, name))
        .collect()
}
