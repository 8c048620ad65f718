//! Database facade: open, recover, and wire the pieces together
//!
//! `Database::open` is the one entry point an embedder needs: it opens the
//! WAL, replays it into a fresh engine (cold-start recovery), and wires the
//! snapshot manager. Everything else delegates to the engine.

use crate::config::Config;
use crate::snapshot::SnapshotManager;
use crate::store::StorageEngine;
use docbase_core::{Document, Result, Value};
use docbase_durability::Wal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// An open document store
pub struct Database {
    engine: Arc<StorageEngine>,
    snapshots: SnapshotManager,
    config: Config,
}

impl Database {
    /// Open (or create) the store described by `config`
    ///
    /// Replays the full WAL into memory before returning, so the database
    /// reflects every durable insert from previous runs.
    pub fn open(config: Config) -> Result<Self> {
        let wal = Arc::new(Wal::open(
            &config.wal_path,
            config.max_segment_bytes,
            config.wal_retention,
        )?);
        let engine = Arc::new(StorageEngine::new(wal.clone()));
        let recovered = engine.recover_from_wal()?;
        info!(
            wal = %config.wal_path.display(),
            recovered,
            "Opened database"
        );

        let snapshots = SnapshotManager::new(
            engine.clone(),
            wal,
            config.snapshot_dir.clone(),
            config.snapshot_retention,
        );

        Ok(Self {
            engine,
            snapshots,
            config,
        })
    }

    /// Insert (or overwrite) a document, journaled to the WAL
    pub fn insert(&self, collection: &str, id: &str, document: Document) -> Result<()> {
        self.engine.insert(collection, id, document, true)
    }

    /// Copy of a live document, or `None` if absent or expired
    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.engine.get_by_id(collection, id)
    }

    /// Documents whose `field` holds exactly `value`
    pub fn query_by_field(&self, collection: &str, field: &str, value: &Value) -> Vec<Document> {
        self.engine.query_by_field(collection, field, value)
    }

    /// All live documents in a collection
    pub fn get_all(&self, collection: &str) -> Vec<Document> {
        self.engine.get_all(collection)
    }

    /// Register a secondary index; returns false if it already existed
    pub fn create_index(&self, collection: &str, field: &str) -> bool {
        self.engine.create_index(collection, field)
    }

    /// Capture a snapshot now; returns the file written
    pub fn take_snapshot(&self) -> Result<PathBuf> {
        self.snapshots.take_snapshot()
    }

    /// Restore from the latest snapshot plus the post-checkpoint WAL tail
    pub fn restore_latest(&self) -> Result<usize> {
        self.snapshots.restore_latest()
    }

    /// The underlying storage engine (for the query executor)
    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// The configuration this database was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }
}
