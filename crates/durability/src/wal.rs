//! Write-ahead log: append-only journal of accepted mutations
//!
//! The WAL is a newline-delimited file of self-describing JSON records, one
//! per insert. Every append is forced to stable storage before it returns;
//! a failed append means the mutation is not durable and callers must not
//! apply (or must roll back) the corresponding in-memory change.
//!
//! ## Segments
//!
//! The active segment has a fixed name. When it reaches the configured size
//! threshold it is rotated: renamed to `<active-name>.<millis>.log`, and a
//! fresh empty active segment is opened. Archived segments beyond the
//! retention count are deleted, oldest first. Archive names embed the
//! rotation timestamp so chronological order equals filename order.
//!
//! ## Recovery
//!
//! - `recover_full` replays archived segments in filename order, then the
//!   active segment from offset 0 (cold start).
//! - `recover_after_checkpoint` replays the active segment from the
//!   checkpoint offset (snapshot-based restore).
//!
//! Both treat a malformed trailing record as recoverable truncation from a
//! prior unclean shutdown: the record is logged and skipped, never fatal.

use docbase_core::{now_millis, Document, Result, TimestampMs};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Operation tag carried by every WAL record
///
/// Insert is the only mutation in this system (no delete or update).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalOp {
    /// Document insert (also covers overwrite of an existing ID)
    Insert,
}

/// One WAL record: operation tag, target, payload, and append timestamp
///
/// The timestamp is assigned by [`Wal::append`], not the caller. Snapshot
/// restore compares it against the snapshot capture time to decide which
/// post-checkpoint entries still need replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Operation tag
    pub operation: WalOp,
    /// Target collection
    pub collection: String,
    /// Document ID within the collection
    pub id: String,
    /// Full document payload as stored (expiry already computed)
    pub document: Document,
    /// Millisecond timestamp assigned at append time
    pub timestamp: TimestampMs,
}

impl WalEntry {
    /// Build an insert record; the timestamp is filled in on append
    pub fn insert(
        collection: impl Into<String>,
        id: impl Into<String>,
        document: Document,
    ) -> Self {
        Self {
            operation: WalOp::Insert,
            collection: collection.into(),
            id: id.into(),
            document,
            timestamp: 0,
        }
    }
}

/// File state guarded by the WAL's lock
struct WalInner {
    file: File,
    /// Write offset of the active segment
    offset: u64,
    /// Checkpoint offset into the active segment; reset to 0 on rotation
    checkpoint: u64,
}

/// Write-ahead log over one active segment plus archived segments
///
/// All methods take `&self`; file state is guarded by an internal mutex
/// independent of the storage engine's lock.
pub struct Wal {
    path: PathBuf,
    max_segment_bytes: u64,
    retention: usize,
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Open the active segment, creating it (and parent directories) if needed
    pub fn open<P: AsRef<Path>>(path: P, max_segment_bytes: u64, retention: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = open_active(&path)?;
        let offset = file.metadata()?.len();

        debug!(path = %path.display(), offset, "Opened WAL");

        Ok(Self {
            path,
            max_segment_bytes,
            retention,
            inner: Mutex::new(WalInner {
                file,
                offset,
                checkpoint: 0,
            }),
        })
    }

    /// Append one record, forcing it to stable storage before returning
    ///
    /// Stamps the entry with the current wall-clock millis and returns that
    /// timestamp. Triggers rotation when the active segment reaches the size
    /// threshold. On error the record must be treated as not durable.
    pub fn append(&self, mut entry: WalEntry) -> Result<TimestampMs> {
        let mut inner = self.inner.lock();

        entry.timestamp = now_millis();
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        inner.file.write_all(line.as_bytes())?;
        inner.file.sync_all()?;
        inner.offset += line.len() as u64;

        if inner.offset >= self.max_segment_bytes {
            self.rotate_locked(&mut inner)?;
        }

        Ok(entry.timestamp)
    }

    /// Record the current write offset as the checkpoint position
    ///
    /// Called immediately after a snapshot is durably written. Returns the
    /// recorded offset.
    pub fn mark_checkpoint(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.checkpoint = inner.offset;
        debug!(checkpoint = inner.checkpoint, "Marked WAL checkpoint");
        inner.checkpoint
    }

    /// Rotate the active segment out and open a fresh one
    ///
    /// The retired segment is renamed to `<active-name>.<millis>.log` and
    /// archived segments beyond the retention count are deleted, oldest
    /// first. The checkpoint is reset to 0: everything in the fresh segment
    /// is by construction past the last checkpoint.
    pub fn rotate(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.rotate_locked(&mut inner)
    }

    fn rotate_locked(&self, inner: &mut WalInner) -> Result<()> {
        inner.file.sync_all()?;

        // Bump the timestamp until the archive name is free so that two
        // rotations within one millisecond cannot clobber each other.
        let mut ts = now_millis();
        let mut archive = archive_path(&self.path, ts);
        while archive.exists() {
            ts += 1;
            archive = archive_path(&self.path, ts);
        }
        fs::rename(&self.path, &archive)?;

        self.cleanup_archives()?;

        inner.file = open_active(&self.path)?;
        inner.offset = 0;
        inner.checkpoint = 0;

        info!(
            path = %self.path.display(),
            archive = %archive.display(),
            "Rotated WAL segment"
        );
        Ok(())
    }

    /// Delete the oldest archived segments beyond the retention count
    fn cleanup_archives(&self) -> Result<()> {
        let mut archives = self.archived_segments()?;
        if archives.len() <= self.retention {
            return Ok(());
        }
        let excess = archives.len() - self.retention;
        for old in archives.drain(..excess) {
            if let Err(e) = fs::remove_file(&old) {
                warn!(path = %old.display(), error = %e, "Failed to delete archived WAL segment");
            } else {
                debug!(path = %old.display(), "Deleted archived WAL segment");
            }
        }
        Ok(())
    }

    /// Archived segments for this WAL, sorted by filename (chronological)
    fn archived_segments(&self) -> Result<Vec<PathBuf>> {
        let Some(parent) = self.path.parent() else {
            return Ok(Vec::new());
        };
        let Some(base) = self.path.file_name().and_then(|n| n.to_str()) else {
            return Ok(Vec::new());
        };
        let prefix = format!("{base}.");

        let mut archives = Vec::new();
        for entry in fs::read_dir(parent)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && name.ends_with(".log") {
                archives.push(entry.path());
            }
        }
        archives.sort();
        Ok(archives)
    }

    /// Replay every entry from the oldest archived segment through the end
    /// of the active segment, in append order
    ///
    /// Entries are decoded under the WAL lock, then `visit` is invoked per
    /// entry in file order after the lock is released. Malformed records
    /// (partial trailing writes) are logged and skipped. Returns the number
    /// of entries visited.
    pub fn recover_full(&self, mut visit: impl FnMut(WalEntry)) -> Result<usize> {
        let entries = {
            let _inner = self.inner.lock();
            let mut entries = Vec::new();
            for segment in self.archived_segments()? {
                read_segment(&segment, 0, &mut entries)?;
            }
            read_segment(&self.path, 0, &mut entries)?;
            entries
        };

        let count = entries.len();
        for entry in entries {
            visit(entry);
        }
        info!(count, "Full WAL recovery complete");
        Ok(count)
    }

    /// Replay active-segment entries at or after the checkpoint offset
    ///
    /// Same decoding and skip-on-malformed behavior as [`Wal::recover_full`].
    /// Returns the number of entries visited.
    pub fn recover_after_checkpoint(&self, mut visit: impl FnMut(WalEntry)) -> Result<usize> {
        let entries = {
            let inner = self.inner.lock();
            let mut entries = Vec::new();
            read_segment(&self.path, inner.checkpoint, &mut entries)?;
            entries
        };

        let count = entries.len();
        for entry in entries {
            visit(entry);
        }
        debug!(count, "Replayed WAL tail after checkpoint");
        Ok(count)
    }

    /// Current write offset of the active segment
    pub fn size(&self) -> u64 {
        self.inner.lock().offset
    }

    /// Current checkpoint offset into the active segment
    pub fn checkpoint(&self) -> u64 {
        self.inner.lock().checkpoint
    }

    /// Path of the active segment
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_active(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(path)
}

fn archive_path(path: &Path, ts: TimestampMs) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{ts}.log"));
    PathBuf::from(name)
}

/// Decode one segment from `offset`, pushing entries in file order
///
/// A line that fails to parse is skipped with a warning; a partial write at
/// the tail of a crashed segment shows up exactly this way.
fn read_segment(path: &Path, offset: u64, entries: &mut Vec<WalEntry>) -> Result<()> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(offset))?;

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<WalEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping malformed WAL record (likely a truncated trailing write)"
                );
            }
        }
    }
    Ok(())
}
