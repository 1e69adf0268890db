//! npudrad — the NPU node agent.
//!
//! Assembles the agent's subsystems:
//! - Template catalog and slice allocation engine
//! - Device discovery and the advertised inventory
//! - Checkpoint store (redb) and CDI spec writer
//! - Claim preparation state machine
//! - Device-class publication
//! - Periodic inventory reconciliation
//! - HTTP claim surface

pub mod api;
pub mod bootstrap;
pub mod reconcile;
