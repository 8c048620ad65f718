//! Error types for docbase
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for docbase operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the document store
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (WAL or snapshot file operations)
    ///
    /// For writes this is never swallowed: an insert whose journal append
    /// fails surfaces this error and leaves no in-memory trace.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Missing document or missing snapshot
    #[error("not found: {0}")]
    NotFound(String),

    /// Query grammar violation
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// Snapshot version mismatch or corrupt record
    #[error("format error: {0}")]
    Format(String),

    /// Unexpected state
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Format(e.to_string())
    }
}
