//! Document and collection types plus TTL/expiry handling
//!
//! A document is an unordered field-name → Value mapping. Collections map
//! document IDs to documents in sorted order (BTreeMap) so full iteration
//! is cheap and deterministic.
//!
//! ## Reserved fields
//!
//! - `_ttl_ms`: relative time-to-live supplied by the caller at insert time.
//!   Never stored; the engine consumes it and computes `_expiry`.
//! - `_expiry`: absolute expiry timestamp in milliseconds, stored
//!   internally. A document whose `_expiry` is at or before the observation
//!   time is logically deleted (lazy expiry: it is physically removed only
//!   when a later operation touches it).

use crate::value::Value;
use std::collections::{BTreeMap, HashMap};

/// One document: field name → value
pub type Document = HashMap<String, Value>;

/// One collection: document ID → document, ordered by ID
pub type Collection = BTreeMap<String, Document>;

/// Full engine state: collection name → collection
pub type StoreState = HashMap<String, Collection>;

/// Millisecond wall-clock timestamp
pub type TimestampMs = i64;

/// Reserved caller-supplied field: relative TTL in milliseconds
pub const TTL_FIELD: &str = "_ttl_ms";

/// Reserved internal field: absolute expiry timestamp in milliseconds
pub const EXPIRY_FIELD: &str = "_expiry";

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry of a document, if it carries a numeric `_expiry` field
pub fn expiry_of(doc: &Document) -> Option<TimestampMs> {
    doc.get(EXPIRY_FIELD).and_then(Value::as_millis)
}

/// Pure expiry predicate: expired iff `_expiry` is present and `<= as_of`
///
/// Documents without an expiry field never expire. Non-numeric `_expiry`
/// values are ignored rather than treated as expired.
pub fn is_expired(doc: &Document, as_of: TimestampMs) -> bool {
    match expiry_of(doc) {
        Some(expiry) => expiry <= as_of,
        None => false,
    }
}
