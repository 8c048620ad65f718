//! Snapshot file format: versioned, compressed, discoverable by filename
//!
//! A snapshot is a zstd-compressed container holding, in order:
//! 1. the literal version tag line (`SNAPSHOT_V1`),
//! 2. the serialized collection → ID → document state as one JSON line,
//! 3. the capture timestamp in milliseconds.
//!
//! Files are named `snapshot_<capture-ms>.snap.zst` inside the snapshot
//! directory, so the manager can discover and order them without any
//! external index. Writes go through a temp file plus rename so a crashed
//! snapshot never leaves a half-written file under the discoverable name.

use docbase_core::{Error, Result, StoreState, TimestampMs};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Literal tag at the head of every snapshot; bump on format changes
pub const SNAPSHOT_VERSION_TAG: &str = "SNAPSHOT_V1";

/// Snapshot filename prefix
pub const SNAPSHOT_PREFIX: &str = "snapshot_";

/// Snapshot filename suffix
pub const SNAPSHOT_SUFFIX: &str = ".snap.zst";

/// Suffix of in-progress snapshot files, renamed away on success
const SNAPSHOT_TMP_SUFFIX: &str = ".snap.tmp";

/// zstd compression level (0 = the crate's default level)
const COMPRESSION_LEVEL: i32 = 0;

/// Path of the snapshot captured at `captured_at` inside `dir`
pub fn snapshot_path(dir: &Path, captured_at: TimestampMs) -> PathBuf {
    dir.join(format!("{SNAPSHOT_PREFIX}{captured_at}{SNAPSHOT_SUFFIX}"))
}

/// Write a snapshot file for `state` captured at `captured_at`
///
/// Returns the final path. The caller is responsible for having already
/// filtered expired documents out of `state`.
pub fn write_snapshot(dir: &Path, state: &StoreState, captured_at: TimestampMs) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    sweep_stale_tmp(dir);

    let final_path = snapshot_path(dir, captured_at);
    let tmp_path = final_path.with_extension("tmp");

    let file = File::create(&tmp_path)?;
    let mut encoder = zstd::stream::Encoder::new(file, COMPRESSION_LEVEL)?;

    encoder.write_all(SNAPSHOT_VERSION_TAG.as_bytes())?;
    encoder.write_all(b"\n")?;
    serde_json::to_writer(&mut encoder, state)?;
    encoder.write_all(b"\n")?;
    encoder.write_all(captured_at.to_string().as_bytes())?;
    encoder.write_all(b"\n")?;

    let file = encoder.finish()?;
    file.sync_all()?;
    fs::rename(&tmp_path, &final_path)?;

    info!(
        path = %final_path.display(),
        captured_at,
        collections = state.len(),
        "Wrote snapshot"
    );
    Ok(final_path)
}

/// Read a snapshot file back into state and capture timestamp
///
/// Fails with a format error if the version tag does not match or any part
/// of the container is corrupt. Nothing is partially applied: the caller
/// receives either the whole state or an error.
pub fn read_snapshot(path: &Path) -> Result<(StoreState, TimestampMs)> {
    let file = File::open(path)?;
    let decoder = zstd::stream::Decoder::new(file)?;
    let mut reader = BufReader::new(decoder);

    let mut tag = String::new();
    reader.read_line(&mut tag)?;
    if tag.trim_end() != SNAPSHOT_VERSION_TAG {
        return Err(Error::Format(format!(
            "unknown snapshot version tag {:?} in {}",
            tag.trim_end(),
            path.display()
        )));
    }

    let mut payload = String::new();
    reader.read_line(&mut payload)?;
    let state: StoreState = serde_json::from_str(payload.trim_end())?;

    let mut ts_line = String::new();
    reader.read_line(&mut ts_line)?;
    let captured_at: TimestampMs = ts_line.trim_end().parse().map_err(|_| {
        Error::Format(format!(
            "missing or invalid capture timestamp in {}",
            path.display()
        ))
    })?;

    debug!(path = %path.display(), captured_at, "Read snapshot");
    Ok((state, captured_at))
}

/// Most recently modified snapshot file in `dir`, if any
pub fn latest_snapshot(dir: &Path) -> Result<Option<PathBuf>> {
    Ok(list_snapshots(dir)?.into_iter().last().map(|(_, _, p)| p))
}

/// Delete snapshot files beyond `keep`, oldest first; returns deleted count
pub fn prune_snapshots(dir: &Path, keep: usize) -> Result<usize> {
    let mut snapshots = list_snapshots(dir)?;
    if snapshots.len() <= keep {
        return Ok(0);
    }

    let excess = snapshots.len() - keep;
    let mut removed = 0;
    for (_, _, path) in snapshots.drain(..excess) {
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "Failed to delete old snapshot");
        } else {
            debug!(path = %path.display(), "Deleted old snapshot");
            removed += 1;
        }
    }
    Ok(removed)
}

/// Delete in-progress files abandoned by a crashed earlier write
fn sweep_stale_tmp(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(SNAPSHOT_PREFIX) || !name.ends_with(SNAPSHOT_TMP_SUFFIX) {
            continue;
        }
        let path = entry.path();
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "Failed to delete abandoned snapshot file");
        } else {
            debug!(path = %path.display(), "Deleted abandoned snapshot file");
        }
    }
}

/// Snapshot files in `dir`, sorted oldest to newest
///
/// Ordered by modification time with the filename (which embeds the capture
/// timestamp) as tiebreaker.
fn list_snapshots(dir: &Path) -> Result<Vec<(SystemTime, String, PathBuf)>> {
    let mut snapshots = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(snapshots),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(SNAPSHOT_PREFIX) || !name.ends_with(SNAPSHOT_SUFFIX) {
            continue;
        }
        let modified = entry
            .metadata()?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        snapshots.push((modified, name.to_string(), entry.path()));
    }

    snapshots.sort();
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbase_core::{Collection, Document, Value};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn sample_state() -> StoreState {
        let mut doc = Document::new();
        doc.insert("name".to_string(), Value::from("Alice"));
        doc.insert("age".to_string(), Value::Int(30));

        let mut coll = Collection::new();
        coll.insert("u1".to_string(), doc);

        let mut state = HashMap::new();
        state.insert("users".to_string(), coll);
        state
    }

    #[test]
    fn test_write_and_read_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let state = sample_state();

        let path = write_snapshot(tmp.path(), &state, 1234).unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("snapshot_1234"));

        let (loaded, captured_at) = read_snapshot(&path).unwrap();
        assert_eq!(captured_at, 1234);
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_read_rejects_wrong_version_tag() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(format!("{SNAPSHOT_PREFIX}1{SNAPSHOT_SUFFIX}"));

        let file = File::create(&path).unwrap();
        let mut encoder = zstd::stream::Encoder::new(file, 0).unwrap();
        encoder.write_all(b"SNAPSHOT_V9\n{}\n1\n").unwrap();
        encoder.finish().unwrap();

        let err = read_snapshot(&path).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_read_rejects_corrupt_payload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(format!("{SNAPSHOT_PREFIX}1{SNAPSHOT_SUFFIX}"));

        let file = File::create(&path).unwrap();
        let mut encoder = zstd::stream::Encoder::new(file, 0).unwrap();
        encoder
            .write_all(format!("{SNAPSHOT_VERSION_TAG}\nnot json\n1\n").as_bytes())
            .unwrap();
        encoder.finish().unwrap();

        assert!(matches!(read_snapshot(&path).unwrap_err(), Error::Format(_)));
    }

    #[test]
    fn test_latest_snapshot_none_when_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(latest_snapshot(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn test_latest_snapshot_missing_dir_is_none() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("never-created");
        assert!(latest_snapshot(&missing).unwrap().is_none());
    }

    #[test]
    fn test_latest_snapshot_picks_newest() {
        let tmp = TempDir::new().unwrap();
        let state = sample_state();

        write_snapshot(tmp.path(), &state, 100).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let newest = write_snapshot(tmp.path(), &state, 200).unwrap();

        assert_eq!(latest_snapshot(tmp.path()).unwrap().unwrap(), newest);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let tmp = TempDir::new().unwrap();
        let state = sample_state();

        for ts in [100, 200, 300, 400, 500] {
            write_snapshot(tmp.path(), &state, ts).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let removed = prune_snapshots(tmp.path(), 3).unwrap();
        assert_eq!(removed, 2);

        let mut remaining: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                format!("{SNAPSHOT_PREFIX}300{SNAPSHOT_SUFFIX}"),
                format!("{SNAPSHOT_PREFIX}400{SNAPSHOT_SUFFIX}"),
                format!("{SNAPSHOT_PREFIX}500{SNAPSHOT_SUFFIX}"),
            ]
        );
    }

    #[test]
    fn test_abandoned_tmp_file_swept_on_next_write() {
        let tmp = TempDir::new().unwrap();
        // A crash between create and rename leaves exactly this behind
        let stray = tmp.path().join(format!("{SNAPSHOT_PREFIX}50{SNAPSHOT_TMP_SUFFIX}"));
        std::fs::write(&stray, b"partial").unwrap();

        assert!(latest_snapshot(tmp.path()).unwrap().is_none());
        let written = write_snapshot(tmp.path(), &sample_state(), 100).unwrap();

        assert!(!stray.exists());
        assert_eq!(latest_snapshot(tmp.path()).unwrap().unwrap(), written);
    }

    #[test]
    fn test_prune_noop_when_under_retention() {
        let tmp = TempDir::new().unwrap();
        write_snapshot(tmp.path(), &sample_state(), 100).unwrap();
        assert_eq!(prune_snapshots(tmp.path(), 3).unwrap(), 0);
    }
}
