//! Fire-and-forget sink for anomaly counters.
//!
//! Nothing on the correctness path depends on the sink: implementations
//! must not fail and must not block.

use std::sync::{Arc, Mutex};

/// A record's api name changed between ingests.
pub const EVENT_API_NAME_CHANGED: &str = "record-api-name-changed";

/// A link pointed at a key with no entry and no placeholder.
pub const EVENT_DANGLING_REFERENCE: &str = "dangling-reference";

/// An ingest sub-path was skipped because of an error.
pub const EVENT_INGEST_SUBTREE_SKIPPED: &str = "ingest-subtree-skipped";

/// A spanning merge into a pending field was skipped.
pub const EVENT_PENDING_MERGE_SKIPPED: &str = "pending-merge-skipped";

/// Event sink consumed by the graph.
pub trait Instrumentation: Send + Sync {
    fn record(&self, event: &str, attributes: &[(&str, &str)]);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInstrumentation;

impl Instrumentation for NoopInstrumentation {
    fn record(&self, _event: &str, _attributes: &[(&str, &str)]) {}
}

/// Sink that forwards events to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInstrumentation;

impl Instrumentation for TracingInstrumentation {
    fn record(&self, event: &str, attributes: &[(&str, &str)]) {
        tracing::info!(event, attributes = ?attributes, "instrumentation event");
    }
}

/// One event captured by [`RecordingInstrumentation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub name: String,
    pub attributes: Vec<(String, String)>,
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingInstrumentation {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingInstrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of events with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .map(|e| e.iter().filter(|ev| ev.name == name).count())
            .unwrap_or(0)
    }
}

impl Instrumentation for RecordingInstrumentation {
    fn record(&self, event: &str, attributes: &[(&str, &str)]) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                name: event.to_string(),
                attributes: attributes
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }
    }
}
