//! recgraph Test Utilities
//!
//! Centralized test infrastructure for the recgraph workspace:
//! - Payload builders in the record wire format
//! - Proptest generators for payloads, arguments and configuration
//! - Test fixtures for common scenarios
//! - A change recorder to register as a listener
//! - Custom assertions for recgraph-specific validation

use std::sync::{Arc, Mutex, Once};

// Re-export core types for convenience
pub use recgraph_core::{
    key_for_connection, key_for_edge, key_for_field_value, key_for_path, key_for_record,
    ArgumentValue, Arguments, Entry, FieldState, FieldValue, FieldValueEntry, GraphConfig,
    GraphError, GraphResult, IngestError, IngestPath, Link, RecordSelection, Scalar, Selection,
    Timestamp, Variables, MASTER_RECORD_TYPE_ID,
};
pub use recgraph_storage::{
    create_ingest, ChangedRecords, EntityMetadataMap, EntrySource, EntryStore, InMemoryDurableStore,
    IngestReport, Ingester, RecordGraph, RecordingInstrumentation,
};

use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

// ============================================================================
// TRACING
// ============================================================================

/// Install a test subscriber once per process.
///
/// The filter comes from `RECGRAPH_LOG`, then `RUST_LOG`, else `warn`.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("RECGRAPH_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

// ============================================================================
// PAYLOAD BUILDERS
// ============================================================================

pub mod payloads {
    //! Builders for payloads in the record wire format.

    use super::*;

    /// `{ value, displayValue }` field wrapper.
    pub fn field(value: Value, display_value: Value) -> Value {
        json!({ "value": value, "displayValue": display_value })
    }

    /// Field wrapper with a null display value.
    pub fn value(value: impl Into<Value>) -> Value {
        field(value.into(), Value::Null)
    }

    pub fn pending_field() -> Value {
        json!({ "pending": true })
    }

    pub fn missing_field() -> Value {
        json!({ "isMissing": true })
    }

    /// Record node with the master record type.
    pub fn record(id: &str, api_name: &str, fields: Value) -> Value {
        json!({
            "id": id,
            "apiName": api_name,
            "recordTypeId": MASTER_RECORD_TYPE_ID,
            "recordTypeInfo": null,
            "weakEtag": 1,
            "systemModstamp": "2024-01-01T00:00:00.000Z",
            "fields": fields
        })
    }

    /// Record node carrying a concrete, non-master record type.
    pub fn record_with_type(id: &str, api_name: &str, record_type_name: &str, fields: Value) -> Value {
        let mut node = record(id, api_name, fields);
        let info = record_type_info(record_type_name);
        node["recordTypeId"] = info["recordTypeId"].clone();
        node["recordTypeInfo"] = info;
        node
    }

    pub fn record_type_info(name: &str) -> Value {
        json!({
            "available": true,
            "defaultRecordTypeMapping": true,
            "master": false,
            "name": name,
            "recordTypeId": "012T00000004MUHIA2"
        })
    }

    pub fn edge(node: Value, cursor: &str) -> Value {
        json!({ "node": node, "cursor": cursor })
    }

    pub fn connection(edges: Vec<Value>) -> Value {
        json!({ "edges": edges })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for recgraph payloads and configuration.

    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Field api names, e.g. `Name`, `Phone`, `Custom__c`.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        prop_oneof![
            "[A-Z][a-z]{1,8}",
            "[A-Z][a-z]{1,6}__c",
        ]
    }

    /// JSON leaf usable as a field value.
    pub fn arb_scalar_json() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
        ]
    }

    /// 15-character record id with a 3-character key prefix.
    pub fn arb_record_id() -> impl Strategy<Value = String> {
        "[0-9a-zA-Z]{3}[0-9A-Z]{12}"
    }

    /// Scalar fields in wire format, keyed by name.
    pub fn arb_fields() -> impl Strategy<Value = BTreeMap<String, Value>> {
        prop::collection::btree_map(
            arb_field_name(),
            (arb_scalar_json(), arb_scalar_json())
                .prop_map(|(v, d)| payloads::field(v, d)),
            0..8,
        )
    }

    /// Record payload with scalar fields only.
    pub fn arb_record_payload(id: String) -> impl Strategy<Value = Value> {
        arb_fields().prop_map(move |fields| {
            let map: serde_json::Map<String, Value> = fields.into_iter().collect();
            payloads::record(&id, "Account", Value::Object(map))
        })
    }

    /// Literal argument values, no variables.
    pub fn arb_argument_value() -> impl Strategy<Value = ArgumentValue> {
        let leaf = prop_oneof![
            Just(ArgumentValue::Null),
            any::<bool>().prop_map(ArgumentValue::Bool),
            any::<i64>().prop_map(ArgumentValue::Int),
            "[a-zA-Z0-9]{0,8}".prop_map(ArgumentValue::String),
            "[A-Z]{1,6}".prop_map(ArgumentValue::Enum),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(ArgumentValue::List),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| ArgumentValue::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Configuration that passes validation.
    pub fn arb_valid_config() -> impl Strategy<Value = GraphConfig> {
        (1usize..=64, 1u64..=3_600_000, 0u64..=86_400_000).prop_map(|(depth, ttl, stale)| {
            GraphConfig::default()
                .with_max_spanning_depth(depth)
                .with_record_ttl(Duration::from_millis(ttl))
                .with_stale_ttl(Duration::from_millis(stale))
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built graphs, plans and configurations.

    use super::*;

    /// Default configuration.
    pub fn test_config() -> GraphConfig {
        GraphConfig::default()
    }

    /// Graph over a shared in-memory durable store with recording instrumentation.
    pub fn in_memory_graph(
        durable: Arc<InMemoryDurableStore>,
        instrumentation: RecordingInstrumentation,
    ) -> RecordGraph<Arc<InMemoryDurableStore>> {
        match RecordGraph::with_instrumentation(durable, test_config(), Arc::new(instrumentation)) {
            Ok(graph) => graph,
            Err(e) => panic!("default config must be valid: {e}"),
        }
    }

    /// Ingester for a single record node.
    pub fn record_ingester() -> Ingester {
        create_ingest(Selection::record())
    }

    /// Path used for single-record ingests.
    pub fn record_path() -> IngestPath {
        IngestPath::root("record")
    }

    /// Root path of graph queries.
    pub fn query_path() -> IngestPath {
        IngestPath::root("uiapi__query")
    }

    /// `where: { Name: { like: <pattern> } }`.
    pub fn where_name_like(pattern: &str) -> Arguments {
        Arguments::new().with(
            "where",
            ArgumentValue::object([(
                "Name",
                ArgumentValue::object([("like", ArgumentValue::string(pattern))]),
            )]),
        )
    }

    /// `{ Account(where: { Name: { like: <pattern> } }) { edges { node } } }`.
    pub fn accounts_query(pattern: &str) -> Selection {
        Selection::object([(
            "Account",
            Selection::connection(where_name_like(pattern), Selection::record()),
        )])
    }
}

// ============================================================================
// CHANGE RECORDER
// ============================================================================

/// Collects every emission delivered to it.
#[derive(Debug, Clone, Default)]
pub struct ChangeRecorder {
    emissions: Arc<Mutex<Vec<(ChangedRecords, EntityMetadataMap)>>>,
}

impl ChangeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener that records into this recorder.
    pub fn listener(&self) -> impl Fn(&ChangedRecords, &EntityMetadataMap) + Send + Sync + 'static {
        let emissions = Arc::clone(&self.emissions);
        move |records, metadata| {
            if let Ok(mut emissions) = emissions.lock() {
                emissions.push((records.clone(), metadata.clone()));
            }
        }
    }

    pub fn count(&self) -> usize {
        self.emissions.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn emissions(&self) -> Vec<(ChangedRecords, EntityMetadataMap)> {
        self.emissions.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<(ChangedRecords, EntityMetadataMap)> {
        self.emissions().pop()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion functions for recgraph-specific validation.

    use super::*;

    fn field_entry<'a, S: EntrySource + ?Sized>(
        source: &'a S,
        record_id: &str,
        field: &str,
    ) -> &'a FieldValueEntry {
        let key = key_for_field_value(&key_for_record(record_id), field);
        match source.entry(&key).and_then(Entry::as_field_value) {
            Some(entry) => entry,
            None => panic!("no field value entry at {key}"),
        }
    }

    /// Assert that an ingest skipped nothing.
    #[track_caller]
    pub fn assert_clean(report: &IngestReport) {
        assert!(report.is_clean(), "Expected clean ingest, got: {:?}", report.errors);
    }

    /// Assert a field's availability state.
    #[track_caller]
    pub fn assert_field_state<S: EntrySource + ?Sized>(
        source: &S,
        record_id: &str,
        field: &str,
        expected: FieldState,
    ) {
        let entry = field_entry(source, record_id, field);
        assert_eq!(entry.state, expected, "Wrong state for {record_id}.{field}");
    }

    /// Assert a present field holds the given text.
    #[track_caller]
    pub fn assert_field_text<S: EntrySource + ?Sized>(
        source: &S,
        record_id: &str,
        field: &str,
        expected: &str,
    ) {
        let entry = field_entry(source, record_id, field);
        assert_eq!(entry.state, FieldState::Present, "{record_id}.{field} is not present");
        assert_eq!(
            entry.value,
            FieldValue::Scalar(Scalar::Text(expected.to_string())),
            "Wrong value for {record_id}.{field}"
        );
    }

    /// Assert a spanning field links to the given record.
    #[track_caller]
    pub fn assert_links_to<S: EntrySource + ?Sized>(
        source: &S,
        record_id: &str,
        field: &str,
        target_id: &str,
    ) {
        let entry = field_entry(source, record_id, field);
        assert_eq!(
            entry.value,
            FieldValue::Record(Link::resolved(key_for_record(target_id))),
            "{record_id}.{field} does not link to {target_id}"
        );
    }

    /// Assert that a GraphResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &GraphResult<T>) {
        match result {
            Err(GraphError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a configuration is valid.
    #[track_caller]
    pub fn assert_config_valid(config: &GraphConfig) {
        if let Err(e) = config.validate() {
            panic!("Config validation failed: {:?}", e);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
