//! Ingest and merge engine.
//!
//! Normalizes a nested payload into flat entries and merges it into the
//! store field by field. Node kinds come from the [`Selection`] the
//! [`Ingester`] was built with.
//!
//! Errors are local: a malformed sub-path is skipped, recorded in the
//! [`IngestReport`], and ingest continues with its siblings. Nothing that
//! was already written is rolled back.

pub mod merge;

use std::collections::BTreeSet;

use recgraph_core::{
    key_for_connection, key_for_edge, key_for_field_value, key_for_record, owning_record_key,
    ConnectionEntry, ConnectionSelection, EdgeEntry, Entry, FieldState, FieldValue,
    FieldValueEntry, GraphConfig, IngestError, IngestPath, Link, ObjectEntry, ObjectSelection,
    RecordSelection, Scalar, Selection, Timestamp,
};
use serde_json::{Map, Value};

use crate::instrumentation::{
    Instrumentation, EVENT_API_NAME_CHANGED, EVENT_INGEST_SUBTREE_SKIPPED,
    EVENT_PENDING_MERGE_SKIPPED,
};
use crate::store::{EntryMetadata, EntryStore};

use self::merge::{merge_display_value, merge_record_header, new_record, IncomingHeader};

/// Collaborators an ingest run needs besides the store.
#[derive(Clone, Copy)]
pub struct IngestEnv<'a> {
    pub config: &'a GraphConfig,
    pub instrumentation: &'a dyn Instrumentation,
}

impl<'a> IngestEnv<'a> {
    pub fn new(config: &'a GraphConfig, instrumentation: &'a dyn Instrumentation) -> Self {
        Self {
            config,
            instrumentation,
        }
    }
}

/// Outcome of one ingest call.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    /// Link to the ingested root, `Missing` when the root itself was skipped.
    pub root: Link,
    /// Every key whose entry was created or changed.
    pub changed_keys: BTreeSet<String>,
    /// Record keys owning a created or changed entry.
    pub changed_records: BTreeSet<String>,
    /// Sub-paths that were skipped.
    pub errors: Vec<IngestError>,
    /// Field keys left pending because a spanning merge into them was refused.
    pub skipped_pending: Vec<String>,
}

impl IngestReport {
    fn empty() -> Self {
        Self {
            root: Link::Missing,
            changed_keys: BTreeSet::new(),
            changed_records: BTreeSet::new(),
            errors: Vec::new(),
            skipped_pending: Vec::new(),
        }
    }

    /// No sub-path was skipped.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        !self.changed_keys.is_empty()
    }
}

/// Ingestion entry point for one query shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingester {
    selection: Selection,
    resolve_pending: bool,
}

/// Build an ingester for a parsed query shape.
pub fn create_ingest(selection: Selection) -> Ingester {
    Ingester::new(selection)
}

impl Ingester {
    pub fn new(selection: Selection) -> Self {
        Self {
            selection,
            resolve_pending: false,
        }
    }

    /// Let this ingester's data resolve pending fields instead of skipping them.
    ///
    /// Used for the response that fulfills the round-trip a pending field
    /// is waiting on.
    pub fn resolving_pending(mut self) -> Self {
        self.resolve_pending = true;
        self
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Normalize `payload` at `path` into `store`.
    ///
    /// Never fails as a whole; check [`IngestReport::errors`] or the store
    /// itself for sub-paths that were skipped.
    pub fn ingest(
        &self,
        payload: &Value,
        path: &IngestPath,
        store: &mut EntryStore,
        env: &IngestEnv<'_>,
        timestamp: Timestamp,
    ) -> IngestReport {
        let mut run = IngestRun {
            store,
            env: *env,
            timestamp,
            resolve_pending: self.resolve_pending,
            report: IngestReport::empty(),
        };
        let root = match run.ingest_node(&self.selection, payload, path, 0) {
            Ok(link) => link,
            Err(e) => {
                run.fail(e);
                Link::Missing
            }
        };
        run.report.root = root;
        tracing::debug!(
            path = %path.key(),
            changed = run.report.changed_keys.len(),
            skipped = run.report.errors.len(),
            "ingest complete"
        );
        run.report
    }
}

// ============================================================================
// INGEST RUN
// ============================================================================

struct IngestRun<'s, 'e> {
    store: &'s mut EntryStore,
    env: IngestEnv<'e>,
    timestamp: Timestamp,
    resolve_pending: bool,
    report: IngestReport,
}

impl IngestRun<'_, '_> {
    fn fail(&mut self, error: IngestError) {
        tracing::warn!(path = error.path(), error = %error, "skipping ingest sub-path");
        self.env
            .instrumentation
            .record(EVENT_INGEST_SUBTREE_SKIPPED, &[("path", error.path())]);
        self.report.errors.push(error);
    }

    /// Store `entry` under `key`, tracking changes and refreshing TTL metadata.
    fn write(&mut self, key: &str, entry: Entry) {
        let unchanged = self.store.get(key) == Some(&entry);
        if !unchanged {
            self.store.put(key, entry);
            self.report.changed_keys.insert(key.to_string());
            if let Some(record_key) = owning_record_key(key) {
                self.report.changed_records.insert(record_key.to_string());
            }
        }
        self.store.set_metadata(
            key,
            EntryMetadata {
                ingested_at: self.timestamp,
                expires_at: self.timestamp.saturating_add(self.env.config.record_ttl_ms()),
            },
        );
    }

    fn ingest_node(
        &mut self,
        selection: &Selection,
        payload: &Value,
        path: &IngestPath,
        depth: usize,
    ) -> Result<Link, IngestError> {
        match selection {
            Selection::Scalar => self.ingest_scalar(payload, &path.key()),
            Selection::Record(record) => self.ingest_record(record, payload, &path.key(), depth),
            Selection::Connection(connection) => {
                self.ingest_connection(connection, payload, path, depth)
            }
            Selection::Object(object) => self.ingest_object(object, payload, path, depth),
        }
    }

    fn ingest_scalar(&mut self, payload: &Value, key: &str) -> Result<Link, IngestError> {
        let scalar = Scalar::from_json(payload).ok_or_else(|| IngestError::Shape {
            path: key.to_string(),
            reason: format!("expected scalar, found {}", json_kind(payload)),
        })?;
        self.write(
            key,
            Entry::FieldValue(FieldValueEntry::present(FieldValue::Scalar(scalar), None)),
        );
        Ok(Link::resolved(key))
    }

    // ------------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------------

    fn ingest_record(
        &mut self,
        selection: &RecordSelection,
        payload: &Value,
        path: &str,
        depth: usize,
    ) -> Result<Link, IngestError> {
        if payload.is_null() {
            return Ok(Link::Missing);
        }
        let limit = self.env.config.max_spanning_depth;
        if depth > limit {
            return Err(IngestError::DepthExceeded {
                path: path.to_string(),
                limit,
            });
        }
        let node = payload.as_object().ok_or_else(|| IngestError::Shape {
            path: path.to_string(),
            reason: format!("expected record object, found {}", json_kind(payload)),
        })?;
        let id = match node.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.as_str(),
            _ => {
                return Err(IngestError::Shape {
                    path: path.to_string(),
                    reason: "record node is missing id".to_string(),
                })
            }
        };
        let key = key_for_record(id);
        let header = IncomingHeader::parse(node).map_err(|reason| IngestError::Shape {
            path: key.clone(),
            reason,
        })?;
        if header.api_name.is_none() && self.store.record(&key).is_none() {
            return Err(IngestError::Shape {
                path: key,
                reason: "new record node is missing apiName".to_string(),
            });
        }
        let fields = match node.get("fields") {
            None | Some(Value::Null) => None,
            Some(Value::Object(fields)) => Some(fields),
            Some(other) => {
                return Err(IngestError::Shape {
                    path: key,
                    reason: format!("fields must be an object, found {}", json_kind(other)),
                })
            }
        };

        let mut links = Vec::new();
        for (name, field) in fields.into_iter().flatten() {
            match self.ingest_record_field(selection, &key, name, field, depth) {
                Ok(link) => links.push((name.clone(), link)),
                Err(e) => self.fail(e),
            }
        }

        // Nested occurrences of the same id may have written the record already.
        let record = match self.store.record(&key).cloned() {
            None => {
                let mut record = new_record(id, &header);
                record.fields.extend(links);
                record
            }
            Some(mut record) => {
                let outcome = merge_record_header(&mut record, &header);
                if let Some(previous) = outcome.api_name_changed_from {
                    tracing::warn!(
                        record_id = id,
                        previous = %previous,
                        current = %record.api_name,
                        "record api name changed between ingests"
                    );
                    self.env.instrumentation.record(
                        EVENT_API_NAME_CHANGED,
                        &[
                            ("recordId", id),
                            ("previous", previous.as_str()),
                            ("current", record.api_name.as_str()),
                        ],
                    );
                }
                record.fields.extend(links);
                record
            }
        };
        self.write(&key, Entry::Record(record));
        Ok(Link::Resolved(key))
    }

    fn ingest_record_field(
        &mut self,
        selection: &RecordSelection,
        record_key: &str,
        name: &str,
        field: &Value,
        depth: usize,
    ) -> Result<Link, IngestError> {
        let field_key = key_for_field_value(record_key, name);
        let field = field.as_object().ok_or_else(|| IngestError::Shape {
            path: field_key.clone(),
            reason: format!(
                "expected {{ value, displayValue }} object, found {}",
                json_kind(field)
            ),
        })?;
        let existing = self
            .store
            .get(&field_key)
            .and_then(Entry::as_field_value)
            .cloned();

        if let Some(placeholder) = incoming_placeholder(field) {
            let keep = matches!(&existing, Some(e) if e.state == FieldState::Present);
            if !keep {
                let entry = match placeholder {
                    FieldState::Pending => FieldValueEntry::pending(),
                    _ => FieldValueEntry::missing(),
                };
                self.write(&field_key, Entry::FieldValue(entry));
            }
            return Ok(Link::Resolved(field_key));
        }

        let display_value = match field.get("displayValue") {
            None => None,
            Some(v) => Some(Scalar::from_json(v).ok_or_else(|| IngestError::Shape {
                path: field_key.clone(),
                reason: format!("displayValue must be scalar, found {}", json_kind(v)),
            })?),
        };
        let value = field.get("value").ok_or_else(|| IngestError::Shape {
            path: field_key.clone(),
            reason: "field is missing value".to_string(),
        })?;

        let new_value = if value.is_object() {
            if let Some(current) = &existing {
                if current.state == FieldState::Pending && !self.resolve_pending {
                    tracing::debug!(key = %field_key, "leaving pending field unmerged");
                    self.env
                        .instrumentation
                        .record(EVENT_PENDING_MERGE_SKIPPED, &[("key", field_key.as_str())]);
                    self.report.skipped_pending.push(field_key.clone());
                    return Ok(Link::Resolved(field_key));
                }
            }
            let default_selection = RecordSelection::default();
            let nested = selection.nested(name).unwrap_or(&default_selection);
            FieldValue::Record(self.ingest_record(nested, value, &field_key, depth + 1)?)
        } else {
            let scalar = Scalar::from_json(value).ok_or_else(|| IngestError::Shape {
                path: field_key.clone(),
                reason: format!(
                    "field value must be scalar or record, found {}",
                    json_kind(value)
                ),
            })?;
            FieldValue::Scalar(scalar)
        };

        let display_value = merge_display_value(
            existing.as_ref().and_then(|e| e.display_value.as_ref()),
            display_value,
        );
        self.write(
            &field_key,
            Entry::FieldValue(FieldValueEntry::present(new_value, display_value)),
        );
        Ok(Link::Resolved(field_key))
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    fn ingest_connection(
        &mut self,
        selection: &ConnectionSelection,
        payload: &Value,
        path: &IngestPath,
        depth: usize,
    ) -> Result<Link, IngestError> {
        let key = key_for_connection(
            &path.parent_key,
            &path.property,
            &selection.arguments,
            &selection.variables,
        )
        .map_err(|source| IngestError::Serialization {
            path: path.key(),
            source,
        })?;
        if payload.is_null() {
            return Ok(Link::Missing);
        }
        let edges = payload
            .as_object()
            .and_then(|c| c.get("edges"))
            .and_then(Value::as_array)
            .ok_or_else(|| IngestError::Shape {
                path: key.clone(),
                reason: "connection is missing an edges array".to_string(),
            })?;

        let mut edge_links = Vec::with_capacity(edges.len());
        for (index, edge) in edges.iter().enumerate() {
            let edge_key = key_for_edge(&key, index);
            let node_link = match edge.get("node") {
                None | Some(Value::Null) => Link::Missing,
                Some(node) => {
                    let node_path = IngestPath::new(edge_key.clone(), "node");
                    match self.ingest_node(&selection.node, node, &node_path, depth) {
                        Ok(link) => link,
                        Err(e) => {
                            self.fail(e);
                            Link::Missing
                        }
                    }
                }
            };
            let cursor = edge
                .get("cursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            self.write(
                &edge_key,
                Entry::Edge(EdgeEntry {
                    cursor,
                    node: node_link,
                }),
            );
            edge_links.push(Link::Resolved(edge_key));
        }

        // Edge list is replaced, not merged: drop edges past the new end.
        let stale_edges = match self.store.get(&key) {
            Some(Entry::Connection(previous)) if previous.edges.len() > edge_links.len() => {
                previous.edges[edge_links.len()..]
                    .iter()
                    .filter_map(|l| l.key().map(str::to_string))
                    .collect()
            }
            _ => Vec::new(),
        };
        for stale in stale_edges {
            self.store.delete(&stale);
            self.report.changed_keys.insert(stale);
        }

        self.write(&key, Entry::Connection(ConnectionEntry { edges: edge_links }));
        Ok(Link::Resolved(key))
    }

    // ------------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------------

    fn ingest_object(
        &mut self,
        selection: &ObjectSelection,
        payload: &Value,
        path: &IngestPath,
        depth: usize,
    ) -> Result<Link, IngestError> {
        if payload.is_null() {
            return Ok(Link::Missing);
        }
        let key = path.key();
        let node = payload.as_object().ok_or_else(|| IngestError::Shape {
            path: key.clone(),
            reason: format!("expected object, found {}", json_kind(payload)),
        })?;

        let mut object = match self.store.get(&key) {
            Some(Entry::Object(existing)) => existing.clone(),
            _ => ObjectEntry::default(),
        };
        for (property, property_selection) in &selection.properties {
            let Some(value) = node.get(property) else {
                object
                    .properties
                    .entry(property.clone())
                    .or_insert(Link::Missing);
                continue;
            };
            let child = IngestPath::new(key.clone(), property.clone());
            match self.ingest_node(property_selection, value, &child, depth) {
                Ok(link) => {
                    object.properties.insert(property.clone(), link);
                }
                Err(e) => {
                    self.fail(e);
                    object
                        .properties
                        .entry(property.clone())
                        .or_insert(Link::Missing);
                }
            }
        }
        self.write(&key, Entry::Object(object));
        Ok(Link::Resolved(key))
    }
}

/// `{ "pending": true }` or `{ "isMissing": true }` field placeholders.
fn incoming_placeholder(field: &Map<String, Value>) -> Option<FieldState> {
    if field.get("pending").and_then(Value::as_bool) == Some(true) {
        Some(FieldState::Pending)
    } else if field.get("isMissing").and_then(Value::as_bool) == Some(true) {
        Some(FieldState::Missing)
    } else {
        None
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
