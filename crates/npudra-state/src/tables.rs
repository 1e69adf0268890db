//! redb table definitions for the checkpoint store.

use redb::TableDefinition;

/// Checkpoint envelopes keyed by checkpoint name.
pub const CHECKPOINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("checkpoints");
