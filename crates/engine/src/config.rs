//! Engine configuration, loadable from a `docbase.toml` file
//!
//! Every field has a default so an empty file (or no file) yields a working
//! configuration. Durability paths default to a `data/` directory relative
//! to the working directory; `Config::in_dir` rebases them for embedders
//! and tests.

use docbase_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "docbase.toml";

const DEFAULT_MAX_SEGMENT_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_WAL_RETENTION: usize = 3;
const DEFAULT_SNAPSHOT_RETENTION: usize = 3;
const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 60;

/// Durability and snapshot settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the active WAL segment
    pub wal_path: PathBuf,
    /// Size threshold that triggers WAL rotation
    pub max_segment_bytes: u64,
    /// Number of archived WAL segments to keep
    pub wal_retention: usize,
    /// Directory snapshot files are written to
    pub snapshot_dir: PathBuf,
    /// Number of snapshot files to keep
    pub snapshot_retention: usize,
    /// Interval between scheduled snapshots, consumed by the embedder
    pub snapshot_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wal_path: PathBuf::from("data/wal.log"),
            max_segment_bytes: DEFAULT_MAX_SEGMENT_BYTES,
            wal_retention: DEFAULT_WAL_RETENTION,
            snapshot_dir: PathBuf::from("data/snapshots"),
            snapshot_retention: DEFAULT_SNAPSHOT_RETENTION,
            snapshot_interval_secs: DEFAULT_SNAPSHOT_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Parse a TOML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        toml::from_str(&raw).map_err(|e| {
            Error::Format(format!(
                "invalid config {}: {e}",
                path.as_ref().display()
            ))
        })
    }

    /// Default configuration with all paths rooted under `dir`
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            wal_path: dir.join("wal.log"),
            snapshot_dir: dir.join("snapshots"),
            ..Self::default()
        }
    }
}
