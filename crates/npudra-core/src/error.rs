//! Error types for npudra core parsing and validation.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("template table: {0}")]
    TemplateTable(String),

    #[error("unrecognized config type: {api_version}/{kind}")]
    UnknownConfigKind { api_version: String, kind: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
