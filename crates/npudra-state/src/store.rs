//! StateStore — redb-backed checkpoint persistence.
//!
//! Checkpoints are written whole: `create` replaces any previous record of
//! the same name inside one write transaction, so a reader never observes a
//! partially updated checkpoint. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Read/write contract the claim state machine relies on.
pub trait CheckpointStore: Send + Sync {
    /// Read a checkpoint. Fails `NotFound` or `Corrupt`.
    fn get(&self, name: &str) -> StateResult<Checkpoint>;

    /// Write a checkpoint, replacing any existing one of the same name.
    fn create(&self, name: &str, checkpoint: &Checkpoint) -> StateResult<()>;

    /// Names of all stored checkpoints.
    fn list_names(&self) -> StateResult<Vec<String>>;
}

/// On-disk record: the serialized checkpoint and its checksum.
#[derive(Serialize, Deserialize)]
struct Envelope {
    checksum: String,
    body: String,
}

fn checksum(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

/// Thread-safe checkpoint store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "checkpoint store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory checkpoint store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CHECKPOINTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Store raw bytes under `name`, bypassing the envelope.
    #[cfg(test)]
    fn put_raw(&self, name: &str, bytes: &[u8]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CHECKPOINTS).map_err(map_err!(Table))?;
            table.insert(name, bytes).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl CheckpointStore for StateStore {
    fn get(&self, name: &str) -> StateResult<Checkpoint> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CHECKPOINTS).map_err(map_err!(Table))?;
        let guard = table
            .get(name)
            .map_err(map_err!(Read))?
            .ok_or_else(|| StateError::NotFound(name.to_string()))?;

        let corrupt = |e: String| StateError::Corrupt(name.to_string(), e);
        let envelope: Envelope =
            serde_json::from_slice(guard.value()).map_err(|e| corrupt(e.to_string()))?;
        if checksum(&envelope.body) != envelope.checksum {
            return Err(corrupt("checksum mismatch".to_string()));
        }
        serde_json::from_str(&envelope.body).map_err(|e| corrupt(e.to_string()))
    }

    fn create(&self, name: &str, checkpoint: &Checkpoint) -> StateResult<()> {
        let body = serde_json::to_string(checkpoint).map_err(map_err!(Serialize))?;
        let envelope = Envelope {
            checksum: checksum(&body),
            body,
        };
        let value = serde_json::to_vec(&envelope).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CHECKPOINTS).map_err(map_err!(Table))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, claims = checkpoint.claims.len(), "checkpoint stored");
        Ok(())
    }

    fn list_names(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CHECKPOINTS).map_err(map_err!(Table))?;
        let mut names = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            names.push(key.value().to_string());
        }
        Ok(names)
    }
}
