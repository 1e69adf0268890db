//! Slice allocation errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("slice {0} has already been allocated")]
    AlreadyAllocated(String),

    #[error("no available slice {0}")]
    SliceUnavailable(String),

    #[error("no template satisfies AICORE>={ai_core}, Memory>={memory_gb}GB")]
    ResourceExhausted { ai_core: u32, memory_gb: u32 },
}

pub type PartitionResult<T> = Result<T, PartitionError>;
