//! Core types for docbase
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: closed tagged-union value type for document fields
//! - Document / Collection / StoreState: the in-memory data model
//! - Reserved TTL and expiry fields plus the expiry predicate
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod value;

pub use document::{
    expiry_of, is_expired, now_millis, Collection, Document, StoreState, TimestampMs,
    EXPIRY_FIELD, TTL_FIELD,
};
pub use error::{Error, Result};
pub use value::Value;
