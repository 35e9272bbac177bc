//! recgraph Storage - Normalized Record Graph
//!
//! The entry store and everything that operates on it: the ingest and
//! merge engine, field-state transitions, read views, change emission and
//! the durable-store adapters. [`RecordGraph`] ties them together.

pub mod durable;
pub mod emit;
pub mod field_state;
pub mod graph;
pub mod ingest;
pub mod instrumentation;
pub mod read;
pub mod resolve;
pub mod store;

pub use durable::{
    denormalize, normalize, DurableEntries, DurableEntry, DurableExpiration, DurableField,
    DurableRecord, DurableStore, DurableValue, InMemoryDurableStore, LmdbDurableStore,
    LoadedRecords, RecordAwareDurableStore,
};
pub use emit::{
    ChangeEmitter, ChangeListener, ChangedRecords, Emission, EmittedRecord, EntityMetadata,
    EntityMetadataMap, ListenerId, ObjectInfo, ObjectInfoProvider, NAME_FIELD_CANDIDATES,
};
pub use field_state::{
    mark_missing, mark_pending, mark_record_pending, mark_record_stale, unlink_removed,
};
pub use graph::RecordGraph;
pub use ingest::{create_ingest, IngestEnv, IngestReport, Ingester};
pub use instrumentation::{
    Instrumentation, NoopInstrumentation, RecordedEvent, RecordingInstrumentation,
    TracingInstrumentation, EVENT_API_NAME_CHANGED, EVENT_DANGLING_REFERENCE,
    EVENT_INGEST_SUBTREE_SKIPPED, EVENT_PENDING_MERGE_SKIPPED,
};
pub use read::{read_record, FieldRead, ReadValue, RecordView};
pub use resolve::{resolve_for_traversal, resolve_link, Resolution};
pub use store::{EntryMetadata, EntrySource, EntryStore};
