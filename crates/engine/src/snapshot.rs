//! Snapshot orchestration: when snapshots happen and how restore replays
//!
//! The file format lives in `docbase-durability::snapshot`; this module owns
//! the protocol around it. Capture, checkpoint, and WAL rotation form one
//! critical section under the engine's state lock, so the snapshot plus the
//! post-checkpoint WAL tail always reconstruct the exact engine state.

use crate::store::StorageEngine;
use docbase_core::{is_expired, now_millis, Error, Result, StoreState};
use docbase_durability::{snapshot, Wal};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Takes, prunes, and restores snapshots for one engine
pub struct SnapshotManager {
    engine: Arc<StorageEngine>,
    wal: Arc<Wal>,
    dir: PathBuf,
    retention: usize,
}

impl SnapshotManager {
    /// Manager writing snapshots into `dir`, keeping at most `retention`
    pub fn new(
        engine: Arc<StorageEngine>,
        wal: Arc<Wal>,
        dir: impl Into<PathBuf>,
        retention: usize,
    ) -> Self {
        Self {
            engine,
            wal,
            dir: dir.into(),
            retention,
        }
    }

    /// Directory snapshots are written to
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Capture the current state to a new snapshot file
    ///
    /// Under the engine lock: filter out documents already expired at the
    /// capture time, write the file, mark the WAL checkpoint, and rotate the
    /// active segment. No insert can interleave, so everything the snapshot
    /// misses is in the fresh segment. Pruning runs after the lock is
    /// released.
    pub fn take_snapshot(&self) -> Result<PathBuf> {
        let captured_at = now_millis();

        let path = self.engine.with_state(|state| {
            let filtered: StoreState = state
                .iter()
                .map(|(name, coll)| {
                    let live = coll
                        .iter()
                        .filter(|(_, doc)| !is_expired(doc, captured_at))
                        .map(|(id, doc)| (id.clone(), doc.clone()))
                        .collect();
                    (name.clone(), live)
                })
                .collect();

            let path = snapshot::write_snapshot(&self.dir, &filtered, captured_at)?;
            self.wal.mark_checkpoint();
            self.wal.rotate()?;
            Ok(path)
        })?;

        match snapshot::prune_snapshots(&self.dir, self.retention) {
            Ok(removed) if removed > 0 => {
                info!(removed, "Pruned old snapshots");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Snapshot pruning failed"),
        }
        Ok(path)
    }

    /// Restore the engine from the most recent snapshot plus the WAL tail
    ///
    /// Fails with `NotFound` when no snapshot exists and with a format error
    /// on a corrupt or unrecognized file; in both cases the engine state is
    /// untouched (the snapshot is parsed in full before anything is
    /// applied). Post-checkpoint WAL entries are re-applied only when their
    /// append timestamp is strictly after the capture time, since entries
    /// past the checkpoint offset may already be folded into the snapshot.
    ///
    /// Returns the number of WAL entries replayed on top of the snapshot.
    pub fn restore_latest(&self) -> Result<usize> {
        let path = snapshot::latest_snapshot(&self.dir)?.ok_or_else(|| {
            Error::NotFound(format!("no snapshot found in {}", self.dir.display()))
        })?;

        let (state, captured_at) = snapshot::read_snapshot(&path)?;
        self.engine.restore(state);

        let mut replayed = 0usize;
        self.wal.recover_after_checkpoint(|entry| {
            if entry.timestamp <= captured_at {
                return;
            }
            match self
                .engine
                .insert(&entry.collection, &entry.id, entry.document, false)
            {
                Ok(()) => replayed += 1,
                Err(e) => warn!(
                    collection = %entry.collection,
                    id = %entry.id,
                    error = %e,
                    "Failed to re-apply WAL entry during restore"
                ),
            }
        })?;

        info!(
            path = %path.display(),
            captured_at,
            replayed,
            "Restored from snapshot"
        );
        Ok(replayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbase_core::{Document, Value, EXPIRY_FIELD};
    use tempfile::TempDir;

    fn setup(tmp: &TempDir) -> (Arc<StorageEngine>, Arc<Wal>, SnapshotManager) {
        let wal = Arc::new(Wal::open(tmp.path().join("wal.log"), 1024 * 1024, 3).unwrap());
        let engine = Arc::new(StorageEngine::new(wal.clone()));
        let mgr = SnapshotManager::new(engine.clone(), wal.clone(), tmp.path().join("snaps"), 3);
        (engine, wal, mgr)
    }

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let (engine, _wal, mgr) = setup(&tmp);

        engine
            .insert("users", "u1", doc(&[("name", Value::from("Alice"))]), true)
            .unwrap();
        mgr.take_snapshot().unwrap();

        // Wreck the in-memory state, then restore
        engine.restore(StoreState::new());
        assert!(engine.get_by_id("users", "u1").is_none());

        mgr.restore_latest().unwrap();
        assert_eq!(
            engine.get_by_id("users", "u1").unwrap().get("name"),
            Some(&Value::from("Alice"))
        );
    }

    #[test]
    fn test_restore_replays_post_snapshot_inserts() {
        let tmp = TempDir::new().unwrap();
        let (engine, _wal, mgr) = setup(&tmp);

        engine
            .insert("users", "u1", doc(&[("name", Value::from("Alice"))]), true)
            .unwrap();
        mgr.take_snapshot().unwrap();
        // Keep append timestamps strictly after the capture time
        std::thread::sleep(std::time::Duration::from_millis(5));
        engine
            .insert("users", "u2", doc(&[("name", Value::from("Bob"))]), true)
            .unwrap();

        engine.restore(StoreState::new());
        let replayed = mgr.restore_latest().unwrap();

        assert_eq!(replayed, 1);
        assert!(engine.get_by_id("users", "u1").is_some());
        assert!(engine.get_by_id("users", "u2").is_some());
    }

    #[test]
    fn test_snapshot_filters_expired() {
        let tmp = TempDir::new().unwrap();
        let (engine, _wal, mgr) = setup(&tmp);

        engine
            .insert("users", "u1", doc(&[("name", Value::from("Alice"))]), true)
            .unwrap();
        engine
            .insert(
                "users",
                "gone",
                doc(&[("name", Value::from("Bob")), (EXPIRY_FIELD, Value::Int(1))]),
                true,
            )
            .unwrap();

        let path = mgr.take_snapshot().unwrap();
        let (state, _) = snapshot::read_snapshot(&path).unwrap();
        let users = state.get("users").unwrap();
        assert!(users.contains_key("u1"));
        assert!(!users.contains_key("gone"));
    }

    #[test]
    fn test_snapshot_rotates_wal() {
        let tmp = TempDir::new().unwrap();
        let (engine, wal, mgr) = setup(&tmp);

        engine
            .insert("users", "u1", doc(&[("name", Value::from("Alice"))]), true)
            .unwrap();
        assert!(wal.size() > 0);

        mgr.take_snapshot().unwrap();
        assert_eq!(wal.size(), 0);
        assert_eq!(wal.checkpoint(), 0);
    }

    #[test]
    fn test_restore_without_snapshot_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let (_engine, _wal, mgr) = setup(&tmp);
        assert!(matches!(mgr.restore_latest(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_retention_bounds_snapshot_count() {
        let tmp = TempDir::new().unwrap();
        let (engine, _wal, mgr) = setup(&tmp);

        engine
            .insert("users", "u1", doc(&[("name", Value::from("Alice"))]), true)
            .unwrap();
        for _ in 0..5 {
            mgr.take_snapshot().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let count = std::fs::read_dir(mgr.dir()).unwrap().count();
        assert_eq!(count, 3);
    }
}
