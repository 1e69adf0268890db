//! Error types for the checkpoint store.

use thiserror::Error;

/// Result type alias for checkpoint store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("checkpoint {0} is corrupt: {1}")]
    Corrupt(String, String),

    #[error("checkpoint not found: {0}")]
    NotFound(String),
}
