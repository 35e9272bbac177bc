//! recgraph Core - Entry Types
//!
//! Pure data structures and pure functions for the normalized record graph:
//! entries and links, canonical keys, ingest plans, errors and configuration.
//! This crate performs no I/O; the storage crate owns all behavior.

pub mod config;
pub mod entry;
pub mod error;
pub mod keys;
pub mod selection;

pub use config::{GraphConfig, DEFAULT_MAX_SPANNING_DEPTH};
pub use entry::{
    ConnectionEntry, EdgeEntry, Entry, FieldState, FieldValue, FieldValueEntry, Link,
    ObjectEntry, RecordEntry, RecordTypeInfo, Scalar, MASTER_RECORD_TYPE_ID,
};
pub use error::{
    ConfigError, DurableStoreError, GraphError, GraphResult, IngestError, SerializationError,
};
pub use keys::{
    connection_segment, key_for_connection, key_for_edge, key_for_field_value, key_for_path,
    key_for_record, owning_record_key, parse_key, ArgumentValue, Arguments, KeyKind, Variables,
};
pub use selection::{
    ConnectionSelection, IngestPath, ObjectSelection, RecordSelection, Selection,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Milliseconds since the Unix epoch, as supplied by the caller's clock.
pub type Timestamp = i64;

