//! Change emission.
//!
//! After an ingest, every changed record is rebuilt in wire form with its
//! spanning records inlined. Fields that are pending, missing, dangling,
//! cyclic or past the depth bound are stripped from the snapshot rather
//! than failing it. Listeners only ever see complete values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use recgraph_core::{
    ConfigError, Entry, FieldState, FieldValue, GraphConfig, Link, RecordEntry,
};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::instrumentation::Instrumentation;
use crate::resolve::{resolve_for_traversal, Resolution};
use crate::store::EntrySource;

/// Conventional name fields, in lookup order.
pub const NAME_FIELD_CANDIDATES: &[&str] = &["Name", "Subject", "Title", "CaseNumber"];

/// One emitted occurrence of a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmittedRecord {
    /// The record changed itself, rather than being reached through a link.
    pub is_primary: bool,
    pub record: Value,
}

/// `{ recordId: { apiName: occurrence } }`.
pub type ChangedRecords = BTreeMap<String, BTreeMap<String, EmittedRecord>>;

/// Per-object metadata sent alongside emitted records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityMetadata {
    #[serde(rename = "_entityLabel")]
    pub entity_label: String,
    #[serde(rename = "_keyPrefix")]
    pub key_prefix: String,
    #[serde(rename = "_nameField")]
    pub name_field: Option<String>,
}

pub type EntityMetadataMap = BTreeMap<String, EntityMetadata>;

/// Everything delivered to listeners for one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Emission {
    pub records: ChangedRecords,
    pub metadata: EntityMetadataMap,
}

/// Object description supplied by an [`ObjectInfoProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectInfo {
    pub key_prefix: Option<String>,
    pub label: String,
    pub name_fields: Vec<String>,
}

/// Optional lookup used to enrich emitted metadata.
pub trait ObjectInfoProvider: Send + Sync {
    fn object_info(&self, api_name: &str) -> Option<ObjectInfo>;
}

/// Handle returned by [`ChangeEmitter::on_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

pub type ChangeListener = Box<dyn Fn(&ChangedRecords, &EntityMetadataMap) + Send + Sync>;

/// Builds emissions and fans them out to listeners.
pub struct ChangeEmitter {
    denylist: Vec<Regex>,
    max_depth: usize,
    instrumentation: Arc<dyn Instrumentation>,
    object_info: Option<Arc<dyn ObjectInfoProvider>>,
    listeners: Vec<(ListenerId, ChangeListener)>,
    next_listener: u64,
}

impl fmt::Debug for ChangeEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEmitter")
            .field("denylist", &self.denylist)
            .field("max_depth", &self.max_depth)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ChangeEmitter {
    pub fn new(
        config: &GraphConfig,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            denylist: config.compiled_denylist()?,
            max_depth: config.max_spanning_depth,
            instrumentation,
            object_info: None,
            listeners: Vec::new(),
            next_listener: 0,
        })
    }

    pub fn with_object_info(mut self, provider: Arc<dyn ObjectInfoProvider>) -> Self {
        self.object_info = Some(provider);
        self
    }

    pub fn on_change<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&ChangedRecords, &EntityMetadataMap) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn off_change(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Whether records of this object are never emitted.
    pub fn is_denied(&self, api_name: &str) -> bool {
        self.denylist.iter().any(|re| re.is_match(api_name))
    }

    /// Build the emission for a batch and notify listeners.
    ///
    /// Returns `None`, without notifying anyone, when nothing is emittable.
    pub fn emit<'k, S, I>(&self, changed_root_keys: I, source: &S) -> Option<Emission>
    where
        S: EntrySource + ?Sized,
        I: IntoIterator<Item = &'k str>,
    {
        let emission = self.build(changed_root_keys, source)?;
        tracing::debug!(
            records = emission.records.len(),
            listeners = self.listeners.len(),
            "emitting changed records"
        );
        for (_, listener) in &self.listeners {
            listener(&emission.records, &emission.metadata);
        }
        Some(emission)
    }

    /// Build the emission for a batch without notifying listeners.
    pub fn build<'k, S, I>(&self, changed_root_keys: I, source: &S) -> Option<Emission>
    where
        S: EntrySource + ?Sized,
        I: IntoIterator<Item = &'k str>,
    {
        let mut records = ChangedRecords::new();
        let mut emitted_records: BTreeMap<String, &RecordEntry> = BTreeMap::new();
        let mut reached = BTreeSet::new();

        let roots: BTreeSet<&str> = changed_root_keys.into_iter().collect();
        for key in &roots {
            let Some(record) = source.entry(key).and_then(Entry::as_record) else {
                continue;
            };
            if self.is_denied(&record.api_name) {
                continue;
            }
            let snapshot = self.snapshot(source, key, record, &mut reached);
            insert(&mut records, record, true, snapshot);
            emitted_records.insert(key.to_string(), record);
        }

        // Records reached only through spanning links.
        for key in reached {
            if roots.contains(key.as_str()) {
                continue;
            }
            let Some(record) = source.entry(&key).and_then(Entry::as_record) else {
                continue;
            };
            if self.is_denied(&record.api_name) {
                continue;
            }
            let snapshot = self.snapshot(source, &key, record, &mut BTreeSet::new());
            insert(&mut records, record, false, snapshot);
            emitted_records.insert(key, record);
        }

        if records.is_empty() {
            return None;
        }
        let metadata = self.metadata(source, emitted_records.values().copied());
        Some(Emission { records, metadata })
    }

    fn snapshot<S: EntrySource + ?Sized>(
        &self,
        source: &S,
        key: &str,
        record: &RecordEntry,
        reached: &mut BTreeSet<String>,
    ) -> Value {
        let mut walk = Walk {
            source,
            max_depth: self.max_depth,
            instrumentation: self.instrumentation.as_ref(),
            ancestors: BTreeSet::new(),
            reached,
        };
        walk.record(key, record, 0)
    }

    fn metadata<'r, S, I>(&self, source: &S, records: I) -> EntityMetadataMap
    where
        S: EntrySource + ?Sized,
        I: Iterator<Item = &'r RecordEntry>,
    {
        let mut out = EntityMetadataMap::new();
        for record in records {
            if out.contains_key(&record.api_name) {
                continue;
            }
            let info = self
                .object_info
                .as_ref()
                .and_then(|p| p.object_info(&record.api_name));
            let metadata = match info {
                Some(info) => EntityMetadata {
                    entity_label: info.label,
                    key_prefix: info
                        .key_prefix
                        .unwrap_or_else(|| inferred_key_prefix(&record.id)),
                    name_field: info.name_fields.into_iter().next(),
                },
                None => EntityMetadata {
                    entity_label: record.api_name.clone(),
                    key_prefix: inferred_key_prefix(&record.id),
                    name_field: inferred_name_field(source, record),
                },
            };
            out.insert(record.api_name.clone(), metadata);
        }
        out
    }
}

fn insert(records: &mut ChangedRecords, record: &RecordEntry, is_primary: bool, snapshot: Value) {
    records
        .entry(record.id.clone())
        .or_default()
        .entry(record.api_name.clone())
        .or_insert(EmittedRecord {
            is_primary,
            record: snapshot,
        });
}

fn inferred_key_prefix(id: &str) -> String {
    id.chars().take(3).collect()
}

fn inferred_name_field<S: EntrySource + ?Sized>(source: &S, record: &RecordEntry) -> Option<String> {
    NAME_FIELD_CANDIDATES
        .iter()
        .find(|name| {
            record
                .fields
                .get(**name)
                .and_then(Link::key)
                .and_then(|k| source.entry(k))
                .and_then(Entry::as_field_value)
                .is_some_and(|f| f.state == FieldState::Present)
        })
        .map(|name| name.to_string())
}

// ============================================================================
// SNAPSHOT WALK
// ============================================================================

struct Walk<'a, S: ?Sized> {
    source: &'a S,
    max_depth: usize,
    instrumentation: &'a dyn Instrumentation,
    ancestors: BTreeSet<String>,
    reached: &'a mut BTreeSet<String>,
}

impl<S: EntrySource + ?Sized> Walk<'_, S> {
    fn record(&mut self, key: &str, record: &RecordEntry, depth: usize) -> Value {
        self.ancestors.insert(key.to_string());

        let mut fields = Map::new();
        for (name, link) in &record.fields {
            if let Some(field) = self.field(link, depth) {
                fields.insert(name.clone(), field);
            }
        }
        self.ancestors.remove(key);

        let mut out = Map::new();
        out.insert("id".to_string(), Value::String(record.id.clone()));
        out.insert("apiName".to_string(), Value::String(record.api_name.clone()));
        if let Some(id) = &record.record_type_id {
            out.insert("recordTypeId".to_string(), Value::String(id.clone()));
        }
        if let Some(info) = &record.record_type_info {
            if let Ok(info) = serde_json::to_value(info) {
                out.insert("recordTypeInfo".to_string(), info);
            }
        }
        if let Some(etag) = record.weak_etag {
            out.insert("weakEtag".to_string(), Value::from(etag));
        }
        if let Some(modstamp) = &record.system_modstamp {
            out.insert("systemModstamp".to_string(), Value::String(modstamp.clone()));
        }
        out.insert("fields".to_string(), Value::Object(fields));
        Value::Object(out)
    }

    /// Wire form of one field, or `None` when it must be stripped.
    fn field(&mut self, link: &Link, depth: usize) -> Option<Value> {
        let source = self.source;
        let field = match resolve_for_traversal(source, link, self.instrumentation) {
            Resolution::Entry(Entry::FieldValue(field)) => field,
            _ => return None,
        };
        if field.state != FieldState::Present {
            return None;
        }
        let value = match &field.value {
            FieldValue::Scalar(s) => s.to_json(),
            FieldValue::Undefined => return None,
            FieldValue::Record(target) => {
                let record = match resolve_for_traversal(source, target, self.instrumentation) {
                    Resolution::Entry(Entry::Record(record)) => record,
                    _ => return None,
                };
                let key = target.key()?;
                if self.ancestors.contains(key) || depth + 1 > self.max_depth {
                    return None;
                }
                self.reached.insert(key.to_string());
                self.record(key, record, depth + 1)
            }
        };
        let display_value = field
            .display_value
            .as_ref()
            .map(|d| d.to_json())
            .unwrap_or(Value::Null);

        let mut out = Map::new();
        out.insert("value".to_string(), value);
        out.insert("displayValue".to_string(), display_value);
        Some(Value::Object(out))
    }
}
