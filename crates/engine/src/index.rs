//! Secondary field indexes: per-field inverted maps from value to ID set
//!
//! Indexes are derived structures. They are never persisted; after any bulk
//! state replacement (snapshot restore) they are rebuilt from the live
//! collections. An index exists only for fields explicitly registered via
//! `create_field`, and from that point on it is maintained incrementally by
//! the storage engine on every insert and expiry-driven removal.
//!
//! ## Key equality
//!
//! `HashMap` keys need `Eq + Hash`, which `f64` does not provide, so index
//! keys wrap [`Value`] with bit-pattern float semantics: two floats are the
//! same key iff their IEEE-754 bit patterns match. This diverges from
//! `Value`'s `PartialEq` only for `NaN` and `-0.0`; the engine re-checks
//! candidates with `Value` equality, so query results are unaffected.

use docbase_core::{Document, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// Hashable wrapper around [`Value`] for use as an inverted-map key
#[derive(Debug, Clone)]
pub struct IndexKey(Value);

impl IndexKey {
    /// Wrap a value for index lookup or insertion
    pub fn new(value: Value) -> Self {
        Self(value)
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        key_eq(&self.0, &other.0)
    }
}

impl Eq for IndexKey {}

impl Hash for IndexKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

fn key_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| key_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, va)| y.get(k).is_some_and(|vb| key_eq(va, vb)))
        }
        _ => false,
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => state.write_u8(0),
        Value::Bool(b) => {
            state.write_u8(1);
            b.hash(state);
        }
        Value::Int(i) => {
            state.write_u8(2);
            i.hash(state);
        }
        Value::Float(f) => {
            state.write_u8(3);
            f.to_bits().hash(state);
        }
        Value::String(s) => {
            state.write_u8(4);
            s.hash(state);
        }
        Value::Array(items) => {
            state.write_u8(5);
            state.write_usize(items.len());
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            // Order-insensitive: XOR of independently hashed entries
            state.write_u8(6);
            state.write_usize(map.len());
            let mut acc = 0u64;
            for (k, v) in map {
                let mut entry = DefaultHasher::new();
                k.hash(&mut entry);
                hash_value(v, &mut entry);
                acc ^= entry.finish();
            }
            state.write_u64(acc);
        }
    }
}

/// All secondary indexes for one collection: field → value → document IDs
#[derive(Debug, Default)]
pub struct FieldIndexes {
    fields: HashMap<String, HashMap<IndexKey, HashSet<String>>>,
}

impl FieldIndexes {
    /// Register a field for indexing; returns false if already registered
    pub fn create_field(&mut self, field: &str) -> bool {
        if self.fields.contains_key(field) {
            return false;
        }
        self.fields.insert(field.to_string(), HashMap::new());
        true
    }

    /// Whether the field has a registered index
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// IDs of documents whose `field` holds exactly `value`
    pub fn lookup(&self, field: &str, value: &Value) -> Option<&HashSet<String>> {
        self.fields.get(field)?.get(&IndexKey::new(value.clone()))
    }

    /// Add one posting for a registered field
    pub fn add_posting(&mut self, field: &str, value: &Value, id: &str) {
        if let Some(postings) = self.fields.get_mut(field) {
            postings
                .entry(IndexKey::new(value.clone()))
                .or_default()
                .insert(id.to_string());
        }
    }

    /// Remove one posting; drops the value bucket when it empties
    pub fn remove_posting(&mut self, field: &str, value: &Value, id: &str) {
        let Some(postings) = self.fields.get_mut(field) else {
            return;
        };
        let key = IndexKey::new(value.clone());
        if let Some(ids) = postings.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                postings.remove(&key);
            }
        }
    }

    /// Add postings for every registered field present in `doc`
    pub fn add_document(&mut self, id: &str, doc: &Document) {
        for (field, postings) in &mut self.fields {
            if let Some(value) = doc.get(field) {
                postings
                    .entry(IndexKey::new(value.clone()))
                    .or_default()
                    .insert(id.to_string());
            }
        }
    }

    /// Remove every posting `doc` contributed
    pub fn remove_document(&mut self, id: &str, doc: &Document) {
        for (field, postings) in &mut self.fields {
            if let Some(value) = doc.get(field) {
                let key = IndexKey::new(value.clone());
                if let Some(ids) = postings.get_mut(&key) {
                    ids.remove(id);
                    if ids.is_empty() {
                        postings.remove(&key);
                    }
                }
            }
        }
    }

    /// Drop all postings and re-add the given documents
    ///
    /// The set of registered fields is preserved. Used after snapshot
    /// restore, where the caller supplies only live (non-expired) documents.
    pub fn rebuild<'a>(&mut self, docs: impl Iterator<Item = (&'a String, &'a Document)>) {
        for postings in self.fields.values_mut() {
            postings.clear();
        }
        for (id, doc) in docs {
            self.add_document(id, doc);
        }
    }
}
