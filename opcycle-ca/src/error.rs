//! Error types for opcycle-ca
//!
//! Filtered transitions, discarded buffers and malformed markup tags are not errors;
//! they are reported as tagged results or logged. Only the cases below surface as
//! `Err`.

use thiserror::Error;

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Analysis error type
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Input breaks the documented shape (negative duration, bad timestamp, unknown state)
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Neither frames nor markup were supplied to the pipeline
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Frame JSON could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Blocking stage task panicked or was cancelled
    #[error("Stage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// opcycle-common error
    #[error("Common error: {0}")]
    Common(#[from] opcycle_common::Error),
}
