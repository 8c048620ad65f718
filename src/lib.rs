//! docbase: a small embedded document store
//!
//! Durable writes through a rotating write-ahead log, point-in-time
//! compressed snapshots, TTL-based lazy expiry, secondary field indexes,
//! and a minimal JSON query language.
//!
//! ```no_run
//! use docbase::{Config, Database, QueryExecutor};
//!
//! # fn main() -> docbase::Result<()> {
//! let db = Database::open(Config::in_dir("data"))?;
//! db.insert(
//!     "users",
//!     "u1",
//!     [("name".to_string(), "Alice".into())].into_iter().collect(),
//! )?;
//!
//! let exec = QueryExecutor::new(db.engine().clone());
//! let alice = exec.execute_raw(r#"{"collection": "users", "id": "u1"}"#)?;
//! assert_eq!(alice["name"], "Alice");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use docbase_core::{
    expiry_of, is_expired, now_millis, Collection, Document, Error, Result, StoreState,
    TimestampMs, Value, EXPIRY_FIELD, TTL_FIELD,
};
pub use docbase_durability::{Wal, WalEntry, WalOp};
pub use docbase_engine::{Config, Database, SnapshotManager, StorageEngine, CONFIG_FILE_NAME};
pub use docbase_query::{CompoundOp, Filter, ParsedQuery, QueryExecutor};
