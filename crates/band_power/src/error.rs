//! Error types for the band power engine

use eeg_types::ConfigError;
use thiserror::Error;

/// Engine-level error types
///
/// Per-tick conditions (a channel still warming up, a NaN power value) are
/// not errors: they are reported through snapshot diagnostics and counters.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("The scheduler must be started from within a tokio runtime")]
    NoRuntime,

    #[error("Calibration failed: {message}")]
    Calibration { message: String },

    #[error("Calibration store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Returned by ingestion when a batch names a channel outside the configured set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);
