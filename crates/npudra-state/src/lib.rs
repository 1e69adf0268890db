//! npudra-state — durable checkpoint of prepared claims.
//!
//! Backed by [redb](https://docs.rs/redb). The checkpoint maps claim UIDs to
//! the devices prepared for them and is the only durable state of the agent:
//! it is read before and rewritten whole after every prepare or unprepare.
//!
//! Each checkpoint is stored as JSON inside an envelope carrying a SHA-256
//! checksum of the body, so a torn or hand-edited record reads back as
//! [`StateError::Corrupt`].

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{CheckpointStore, StateStore};
pub use types::*;
