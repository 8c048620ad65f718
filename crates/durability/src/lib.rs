//! Durability layer for docbase
//!
//! Two concerns live here:
//! - `wal`: the write-ahead log (append, checkpoint, rotation, recovery)
//! - `snapshot`: the versioned compressed snapshot file format
//!
//! Orchestration (when snapshots are taken, how recovered entries are
//! applied) belongs to the engine crate; this crate only owns the files.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod snapshot;
pub mod wal;

pub use wal::{Wal, WalEntry, WalOp};
