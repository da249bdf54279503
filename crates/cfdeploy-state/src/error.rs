//! Error types for the cfdeploy state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while persisting resource records.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("failed to encode record {address}: {reason}")]
    Encode { address: String, reason: String },

    #[error("failed to decode record {address}: {reason}")]
    Decode { address: String, reason: String },
}
