//! Error types for recgraph operations

use thiserror::Error;

/// Connection-argument canonicalization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("Unresolved variable ${name} in arguments of {field}")]
    UnresolvedVariable { field: String, name: String },

    #[error("Non-finite number in argument {argument} of {field}")]
    NonFiniteNumber { field: String, argument: String },

    #[error("Duplicate key {key} in arguments of {field}")]
    DuplicateKey { field: String, key: String },
}

/// Errors raised while ingesting one sub-path of a payload.
///
/// These never escape `ingest`: the offending sub-path is skipped and the
/// error is collected into the ingest report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("Payload at {path} has unexpected shape: {reason}")]
    Shape { path: String, reason: String },

    #[error("Spanning depth limit {limit} exceeded at {path}")]
    DepthExceeded { path: String, limit: usize },

    #[error("Connection at {path} skipped: {source}")]
    Serialization {
        path: String,
        #[source]
        source: SerializationError,
    },
}

impl IngestError {
    /// Path of the sub-tree that was skipped.
    pub fn path(&self) -> &str {
        match self {
            Self::Shape { path, .. }
            | Self::DepthExceeded { path, .. }
            | Self::Serialization { path, .. } => path,
        }
    }
}

/// Durable store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DurableStoreError {
    #[error("Durable backend failure during {operation}: {reason}")]
    Backend { operation: String, reason: String },

    #[error("Failed to encode or decode durable entry {key}: {reason}")]
    Codec { key: String, reason: String },

    #[error("Durable entry {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Master error type for all recgraph errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Durable store error: {0}")]
    Durable(#[from] DurableStoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for recgraph operations.
pub type GraphResult<T> = Result<T, GraphError>;

// =============================================================================
// TESTS
// =============================================================================
