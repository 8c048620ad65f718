//! Storage engine for docbase
//!
//! Owns the in-memory collections and secondary indexes, the snapshot
//! protocol, configuration, and the `Database` facade that ties the WAL,
//! engine, and snapshot manager together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod db;
pub mod index;
pub mod snapshot;
pub mod store;

pub use config::{Config, CONFIG_FILE_NAME};
pub use db::Database;
pub use snapshot::SnapshotManager;
pub use store::StorageEngine;
