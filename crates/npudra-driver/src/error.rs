//! Error types for claim preparation.

use npudra_core::CoreError;
use npudra_partition::PartitionError;
use npudra_state::StateError;
use thiserror::Error;

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("requested device is not allocatable: {0}")]
    NotAllocatable(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("claim not yet allocated: {0}")]
    ClaimNotAllocated(String),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error("upstream: {0}")]
    Upstream(String),
}

impl From<StateError> for DriverError {
    fn from(e: StateError) -> Self {
        DriverError::Upstream(format!("checkpoint: {e}"))
    }
}

impl From<CoreError> for DriverError {
    fn from(e: CoreError) -> Self {
        DriverError::InvalidConfig(e.to_string())
    }
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Upstream(e.to_string())
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(e: serde_json::Error) -> Self {
        DriverError::Upstream(e.to_string())
    }
}
