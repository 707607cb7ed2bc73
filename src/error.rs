//! Error types for Taskpulse
//!
//! Data sparsity is never an error here: malformed payloads become empty
//! attribute maps with quality flags, thin baselines become
//! `BaselineValue::Undefined`, and empty composites come back as the neutral
//! sentinel flagged undetermined. Errors are reserved for caller mistakes
//! (bad weight schema, unknown identifiers) and broken input streams.

use thiserror::Error;

/// Errors that can surface from the scoring engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to parse record: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Unknown weight key '{key}' for score '{score}'")]
    UnknownWeightKey { score: String, key: String },

    #[error("Non-finite weight value for key '{key}': {value}")]
    NonFiniteWeight { key: String, value: f64 },

    #[error("Negative weight value for key '{key}': {value}")]
    NegativeWeight { key: String, value: f64 },

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    #[error("Instance source error: {0}")]
    SourceError(String),
}
