//! Record-aware durable adapter.
//!
//! Wraps any [`DurableStore`] and collapses record and field keys into one
//! denormalized blob per record:
//!
//! - writes denormalize each touched record once per batch; a batch that
//!   only carries field values is merged over the record already stored
//! - reads fetch each record blob once per batch, however many of its
//!   keys were requested
//! - evicting a field key rewrites its record blob without that field
//!
//! Keys that belong to no record pass through untouched.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use recgraph_core::{owning_record_key, parse_key, DurableStoreError, Entry, GraphResult, KeyKind};

use super::record::{denormalize, normalize, DurableRecord};
use super::{DurableEntries, DurableEntry, DurableExpiration, DurableStore};

/// Batch keys split by owner.
#[derive(Debug, Default)]
struct KeyPlan {
    /// Record key -> requested keys owned by it.
    records: BTreeMap<String, Vec<String>>,
    passthrough: Vec<String>,
}

impl KeyPlan {
    fn new<'a>(keys: impl IntoIterator<Item = &'a String>) -> Self {
        let mut plan = Self::default();
        for key in keys {
            match owning_record_key(key) {
                Some(record_key) => plan
                    .records
                    .entry(record_key.to_string())
                    .or_default()
                    .push(key.clone()),
                None => plan.passthrough.push(key.clone()),
            }
        }
        plan
    }

    fn record_keys(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }
}

/// Durable adapter that stores one blob per record.
#[derive(Debug)]
pub struct RecordAwareDurableStore<D> {
    inner: D,
}

impl<D: DurableStore> RecordAwareDurableStore<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Fetch record blobs, decoded.
    pub async fn get_records(
        &self,
        record_keys: &[String],
    ) -> GraphResult<BTreeMap<String, DurableRecord>> {
        let Some(found) = self.inner.get_entries(record_keys).await? else {
            return Ok(BTreeMap::new());
        };
        found
            .into_iter()
            .map(|(key, entry)| decode_record(&key, entry).map(|r| (key, r)))
            .collect()
    }

    /// Every normalized entry held in the blobs of `record_keys`, nested
    /// records included.
    pub async fn get_record_entries(
        &self,
        record_keys: &[String],
    ) -> GraphResult<BTreeMap<String, Entry>> {
        Ok(self.load_records(record_keys).await?.entries)
    }

    /// Load the blobs of `record_keys` together with the own blobs of every
    /// record inlined in them.
    ///
    /// A record's own blob beats any copy inlined in another record's blob,
    /// so entries and expirations always come from the latest write of that
    /// record. Each blob is fetched once; records that exist only as inlined
    /// copies take the expiration of the blob that carried them.
    pub async fn load_records(&self, record_keys: &[String]) -> GraphResult<LoadedRecords> {
        let mut own: BTreeMap<String, DurableRecord> = BTreeMap::new();
        let mut requested: BTreeSet<String> = BTreeSet::new();
        let mut batch: Vec<String> = record_keys
            .iter()
            .filter(|k| requested.insert((*k).clone()))
            .cloned()
            .collect();

        while !batch.is_empty() {
            let mut next = Vec::new();
            for (key, record) in self.get_records(&batch).await? {
                for nested in inlined_record_keys(&record) {
                    if requested.insert(nested.clone()) {
                        next.push(nested);
                    }
                }
                own.insert(key, record);
            }
            batch = next;
        }

        let mut loaded = LoadedRecords::default();
        for (key, record) in &own {
            if let Some(expiration) = record.expiration {
                loaded.expirations.insert(key.clone(), expiration);
            }
        }
        for (root, record) in &own {
            for (key, entry) in normalize(record) {
                let owner = owning_record_key(&key).unwrap_or(key.as_str());
                if owner != root {
                    if own.contains_key(owner) {
                        continue;
                    }
                    if let Some(expiration) = record.expiration {
                        loaded
                            .expirations
                            .entry(owner.to_string())
                            .or_insert(expiration);
                    }
                }
                loaded.entries.entry(key).or_insert(entry);
            }
        }
        Ok(loaded)
    }
}

/// Entries rebuilt from record blobs, with the expiration of each record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedRecords {
    pub entries: BTreeMap<String, Entry>,
    /// Record key -> expiration of the blob its entries came from.
    pub expirations: BTreeMap<String, DurableExpiration>,
}

impl LoadedRecords {
    /// Expiration governing `key`, looked up through its owning record.
    pub fn expiration_for(&self, key: &str) -> Option<DurableExpiration> {
        let owner = owning_record_key(key).unwrap_or(key);
        self.expirations.get(owner).copied()
    }
}

/// Keys of the records inlined anywhere inside `record`.
fn inlined_record_keys(record: &DurableRecord) -> Vec<String> {
    let root = record.key();
    normalize(record)
        .into_keys()
        .filter(|k| *k != root && matches!(parse_key(k), KeyKind::Record { .. }))
        .collect()
}

fn decode_record(key: &str, entry: DurableEntry) -> GraphResult<DurableRecord> {
    let mut record: DurableRecord =
        serde_json::from_value(entry.data).map_err(|e| DurableStoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
    if record.expiration.is_none() {
        record.expiration = entry.expiration;
    }
    Ok(record)
}

fn encode_record(record: &DurableRecord) -> GraphResult<DurableEntry> {
    let data = serde_json::to_value(record).map_err(|e| DurableStoreError::Codec {
        key: record.key(),
        reason: e.to_string(),
    })?;
    Ok(DurableEntry {
        data,
        expiration: record.expiration,
    })
}

fn decode_entry(key: &str, entry: &DurableEntry) -> GraphResult<Entry> {
    Ok(
        serde_json::from_value(entry.data.clone()).map_err(|e| DurableStoreError::Codec {
            key: key.to_string(),
            reason: e.to_string(),
        })?,
    )
}

fn encode_entry(key: &str, entry: &Entry) -> GraphResult<serde_json::Value> {
    Ok(
        serde_json::to_value(entry).map_err(|e| DurableStoreError::Codec {
            key: key.to_string(),
            reason: e.to_string(),
        })?,
    )
}

#[async_trait]
impl<D: DurableStore> DurableStore for RecordAwareDurableStore<D> {
    async fn get_entries(&self, keys: &[String]) -> GraphResult<Option<DurableEntries>> {
        let plan = KeyPlan::new(keys);
        let mut request = plan.record_keys();
        request.extend(plan.passthrough.iter().cloned());
        let Some(found) = self.inner.get_entries(&request).await? else {
            return Ok(None);
        };

        let mut out = DurableEntries::new();
        for (record_key, wanted) in &plan.records {
            let Some(blob) = found.get(record_key) else {
                continue;
            };
            let record = decode_record(record_key, blob.clone())?;
            let entries = normalize(&record);
            for key in wanted {
                if let Some(entry) = entries.get(key) {
                    out.insert(
                        key.clone(),
                        DurableEntry {
                            data: encode_entry(key, entry)?,
                            expiration: record.expiration,
                        },
                    );
                }
            }
        }
        for key in &plan.passthrough {
            if let Some(entry) = found.get(key) {
                out.insert(key.clone(), entry.clone());
            }
        }
        tracing::debug!(
            requested = keys.len(),
            records = plan.records.len(),
            found = out.len(),
            "durable read"
        );
        Ok((!out.is_empty()).then_some(out))
    }

    async fn set_entries(&self, entries: DurableEntries) -> GraphResult<()> {
        let plan = KeyPlan::new(entries.keys());

        // Batch entries overlay whatever the stored blobs already hold.
        let mut source = self.get_record_entries(&plan.record_keys()).await?;
        let mut expirations: BTreeMap<String, DurableExpiration> = BTreeMap::new();
        for (record_key, keys) in &plan.records {
            for key in keys {
                let entry = &entries[key];
                source.insert(key.clone(), decode_entry(key, entry)?);
                if let Some(expiration) = entry.expiration {
                    let slot = expirations.entry(record_key.clone()).or_insert(expiration);
                    if key == record_key {
                        *slot = expiration;
                    }
                }
            }
        }

        let mut out = DurableEntries::new();
        for record_key in plan.records.keys() {
            match denormalize(record_key, &source, expirations.get(record_key).copied()) {
                Some(record) => {
                    out.insert(record_key.clone(), encode_record(&record)?);
                }
                None => {
                    tracing::warn!(
                        record_key = %record_key,
                        "dropping field values with no record to attach to"
                    );
                }
            }
        }
        for key in &plan.passthrough {
            if let Some(entry) = entries.get(key) {
                out.insert(key.clone(), entry.clone());
            }
        }

        tracing::debug!(
            entries = entries.len(),
            records = plan.records.len(),
            written = out.len(),
            "durable write"
        );
        if out.is_empty() {
            return Ok(());
        }
        self.inner.set_entries(out).await
    }

    async fn evict_entries(&self, keys: &[String]) -> GraphResult<()> {
        let plan = KeyPlan::new(keys);

        let mut whole_records = Vec::new();
        let mut trimmed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (record_key, owned) in &plan.records {
            if owned.iter().any(|k| k == record_key) {
                whole_records.push(record_key.clone());
            } else {
                let fields = owned
                    .iter()
                    .filter_map(|k| match parse_key(k) {
                        KeyKind::Field { field, .. } => Some(field.to_string()),
                        _ => None,
                    })
                    .collect();
                trimmed.insert(record_key.clone(), fields);
            }
        }

        if !trimmed.is_empty() {
            let trimmed_keys: Vec<String> = trimmed.keys().cloned().collect();
            let mut rewritten = DurableEntries::new();
            for (record_key, mut record) in self.get_records(&trimmed_keys).await? {
                if let Some(fields) = trimmed.get(&record_key) {
                    record.fields.retain(|name, _| !fields.contains(name));
                }
                rewritten.insert(record_key, encode_record(&record)?);
            }
            if !rewritten.is_empty() {
                self.inner.set_entries(rewritten).await?;
            }
        }

        let mut evict = whole_records;
        evict.extend(plan.passthrough);
        if evict.is_empty() {
            return Ok(());
        }
        self.inner.evict_entries(&evict).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::InMemoryDurableStore;
    use recgraph_core::{
        key_for_field_value, key_for_record, FieldValue, FieldValueEntry, Link, RecordEntry,
        Scalar,
    };
    use std::sync::Arc;

    fn entries(pairs: Vec<(String, Entry)>) -> DurableEntries {
        pairs
            .into_iter()
            .map(|(k, e)| {
                let data = serde_json::to_value(&e).unwrap();
                (k, DurableEntry::new(data))
            })
            .collect()
    }

    fn account(fields: &[(&str, &str)]) -> Vec<(String, Entry)> {
        let record_key = key_for_record("001");
        let mut record = RecordEntry::new("001", "Account");
        let mut out = Vec::new();
        for (name, value) in fields {
            let key = key_for_field_value(&record_key, name);
            record.fields.insert(name.to_string(), Link::resolved(key.clone()));
            out.push((key, field(value)));
        }
        out.push((record_key, Entry::Record(record)));
        out
    }

    fn field(value: &str) -> Entry {
        Entry::FieldValue(FieldValueEntry::present(
            FieldValue::Scalar(Scalar::Text(value.to_string())),
            None,
        ))
    }

    fn store() -> (Arc<InMemoryDurableStore>, RecordAwareDurableStore<Arc<InMemoryDurableStore>>) {
        let inner = Arc::new(InMemoryDurableStore::new());
        (Arc::clone(&inner), RecordAwareDurableStore::new(inner))
    }

    #[tokio::test]
    async fn test_record_and_fields_collapse_to_one_blob() {
        let (inner, store) = store();
        let mut batch = entries(account(&[("Name", "Acme"), ("Phone", "555")]));
        batch.insert("uiapi__query".to_string(), DurableEntry::new(serde_json::json!(1)));
        store.set_entries(batch).await.unwrap();

        let raw = inner.snapshot().await;
        assert_eq!(raw.len(), 2);
        assert!(raw.contains_key(&key_for_record("001")));
        assert!(raw.contains_key("uiapi__query"));
    }

    #[tokio::test]
    async fn test_reads_fetch_each_record_once() {
        let (inner, store) = store();
        store
            .set_entries(entries(account(&[("Name", "Acme"), ("Phone", "555")])))
            .await
            .unwrap();

        let record_key = key_for_record("001");
        let keys = vec![
            record_key.clone(),
            key_for_field_value(&record_key, "Name"),
            key_for_field_value(&record_key, "Phone"),
        ];
        let before = inner.read_log().await.len();
        let got = store.get_entries(&keys).await.unwrap().expect("found");
        let log = inner.read_log().await;
        assert_eq!(&log[before..], &[record_key.clone()]);

        assert_eq!(got.len(), 3);
        let name: Entry =
            serde_json::from_value(got[&key_for_field_value(&record_key, "Name")].data.clone())
                .unwrap();
        assert_eq!(name, field("Acme"));
    }

    #[tokio::test]
    async fn test_field_only_batch_merges_into_blob() {
        let (_, store) = store();
        store
            .set_entries(entries(account(&[("Name", "Acme")])))
            .await
            .unwrap();

        let record_key = key_for_record("001");
        let name_key = key_for_field_value(&record_key, "Name");
        store
            .set_entries(entries(vec![(name_key.clone(), field("Renamed"))]))
            .await
            .unwrap();

        let got = store.get_record_entries(&[record_key.clone()]).await.unwrap();
        assert_eq!(got[&name_key], field("Renamed"));
        assert!(got[&record_key].as_record().is_some());
    }

    fn contact_of_account() -> Vec<(String, Entry)> {
        let record_key = key_for_record("003");
        let account_key = key_for_field_value(&record_key, "Account");
        let mut record = RecordEntry::new("003", "Contact");
        record
            .fields
            .insert("Account".to_string(), Link::resolved(account_key.clone()));
        let link = Entry::FieldValue(FieldValueEntry::present(
            FieldValue::Record(Link::resolved(key_for_record("001"))),
            None,
        ));
        vec![(account_key, link), (record_key, Entry::Record(record))]
    }

    #[tokio::test]
    async fn test_own_blob_beats_inlined_copy() {
        let (_, store) = store();
        let mut first = contact_of_account();
        first.extend(account(&[("Name", "Old")]));
        store.set_entries(entries(first)).await.unwrap();

        let renamed = DurableExpiration {
            fresh: 9_000,
            stale: 10_000,
        };
        let batch = entries(account(&[("Name", "New")]))
            .into_iter()
            .map(|(k, e)| (k, e.with_expiration(renamed)))
            .collect();
        store.set_entries(batch).await.unwrap();

        let name_key = key_for_field_value(&key_for_record("001"), "Name");
        let loaded = store.load_records(&[key_for_record("003")]).await.unwrap();
        assert_eq!(loaded.entries[&name_key], field("New"));
        assert_eq!(loaded.expiration_for(&name_key), Some(renamed));
        assert_eq!(loaded.expiration_for(&key_for_record("003")), None);

        // Rewriting the parent refreshes its inlined copy.
        store.set_entries(entries(contact_of_account())).await.unwrap();
        let records = store.get_records(&[key_for_record("003")]).await.unwrap();
        let inlined = normalize(&records[&key_for_record("003")]);
        assert_eq!(inlined[&name_key], field("New"));
    }

    #[tokio::test]
    async fn test_orphan_fields_are_dropped() {
        let (inner, store) = store();
        let name_key = key_for_field_value(&key_for_record("001"), "Name");
        store
            .set_entries(entries(vec![(name_key, field("Acme"))]))
            .await
            .unwrap();
        assert!(inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_field_eviction_rewrites_blob() {
        let (inner, store) = store();
        store
            .set_entries(entries(account(&[("Name", "Acme"), ("Phone", "555")])))
            .await
            .unwrap();

        let record_key = key_for_record("001");
        store
            .evict_entries(&[key_for_field_value(&record_key, "Phone")])
            .await
            .unwrap();
        let records = store.get_records(&[record_key.clone()]).await.unwrap();
        let fields: Vec<&String> = records[&record_key].fields.keys().collect();
        assert_eq!(fields, vec!["Name"]);

        store.evict_entries(&[record_key]).await.unwrap();
        assert!(inner.is_empty().await);
    }
}
