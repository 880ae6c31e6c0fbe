//! Error types for the metric value model, buffer, batcher and cardinality guard

use thiserror::Error;

/// Result type alias using this crate's `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for `metrics-core`
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
