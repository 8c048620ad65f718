//! In-memory storage engine: collections plus secondary indexes
//!
//! One exclusive mutex guards the whole `{collections, indexes}` state.
//! Lazy expiry means every read is a potential write (an expired document is
//! physically removed by whichever operation touches it first), so reads
//! take the same exclusive lock as writes. The WAL keeps its own internal
//! lock; journaled inserts run journal-then-apply inside the engine lock so
//! the log order matches the apply order.

use crate::index::FieldIndexes;
use docbase_core::{
    is_expired, now_millis, Collection, Document, Result, StoreState, Value, EXPIRY_FIELD,
    TTL_FIELD,
};
use docbase_durability::{Wal, WalEntry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Collections and their secondary indexes, guarded as one unit
#[derive(Default)]
struct EngineState {
    collections: StoreState,
    indexes: HashMap<String, FieldIndexes>,
}

/// The storage engine: durable, indexed, TTL-aware document storage
pub struct StorageEngine {
    wal: Arc<Wal>,
    state: Mutex<EngineState>,
}

impl StorageEngine {
    /// New empty engine journaling to `wal`
    pub fn new(wal: Arc<Wal>) -> Self {
        Self {
            wal,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Insert (or overwrite) a document
    ///
    /// A caller-supplied `_ttl_ms` field is consumed here: it is removed
    /// from the document and replaced by an absolute `_expiry` timestamp, so
    /// the journaled and stored form are identical and replay never extends
    /// a TTL.
    ///
    /// With `journal` set the entry is appended to the WAL first; an I/O
    /// error aborts the insert with no in-memory effect. Recovery and
    /// snapshot replay pass `journal = false`.
    pub fn insert(
        &self,
        collection: &str,
        id: &str,
        mut document: Document,
        journal: bool,
    ) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(ttl) = document.remove(TTL_FIELD) {
            match ttl.as_millis() {
                Some(ttl_ms) => {
                    // Saturate: a huge TTL means "effectively never expires",
                    // not a wrapped-negative instant expiry
                    let expiry = now_millis().saturating_add(ttl_ms);
                    document.insert(EXPIRY_FIELD.to_string(), Value::Int(expiry));
                }
                None => {
                    warn!(
                        collection,
                        id,
                        ttl_type = ttl.type_name(),
                        "Ignoring non-numeric TTL field"
                    );
                }
            }
        }

        if journal {
            self.wal
                .append(WalEntry::insert(collection, id, document.clone()))?;
        }

        let EngineState {
            collections,
            indexes,
        } = &mut *state;
        let coll = collections.entry(collection.to_string()).or_default();
        let mut ix = indexes.get_mut(collection);

        if let Some(previous) = coll.insert(id.to_string(), document) {
            if let Some(ix) = ix.as_deref_mut() {
                ix.remove_document(id, &previous);
            }
        }
        if let Some(ix) = ix {
            // The document was just moved into the collection; index it from there
            if let Some(doc) = coll.get(id) {
                ix.add_document(id, doc);
            }
        }
        Ok(())
    }

    /// Copy of a live document, or `None` if absent or expired
    ///
    /// An expired document is removed from the collection and purged from
    /// every index posting before `None` is returned.
    pub fn get_by_id(&self, collection: &str, id: &str) -> Option<Document> {
        let now = now_millis();
        let mut state = self.state.lock();
        let EngineState {
            collections,
            indexes,
        } = &mut *state;

        let coll = collections.get_mut(collection)?;
        let doc = coll.get(id)?;
        if is_expired(doc, now) {
            purge(coll, indexes.get_mut(collection), id);
            return None;
        }
        Some(doc.clone())
    }

    /// Documents whose `field` holds exactly `value`
    ///
    /// Uses the secondary index when one exists for the field, falling back
    /// to a full collection scan. Either path removes the expired documents
    /// it encounters.
    pub fn query_by_field(&self, collection: &str, field: &str, value: &Value) -> Vec<Document> {
        let now = now_millis();
        let mut state = self.state.lock();
        let EngineState {
            collections,
            indexes,
        } = &mut *state;

        let Some(coll) = collections.get_mut(collection) else {
            return Vec::new();
        };

        let indexed = indexes
            .get(collection)
            .is_some_and(|ix| ix.has_field(field));
        if indexed {
            let mut ix = indexes.get_mut(collection);
            let candidates: Vec<String> = ix
                .as_deref()
                .and_then(|ix| ix.lookup(field, value))
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default();

            let mut results = Vec::new();
            for id in candidates {
                match coll.get(&id) {
                    Some(doc) if is_expired(doc, now) => {
                        purge(coll, ix.as_deref_mut(), &id);
                    }
                    Some(doc) if doc.get(field) == Some(value) => results.push(doc.clone()),
                    Some(_) => {
                        // Bit-pattern key matched but value equality did not
                        // (NaN or -0.0); the candidate is simply not a hit.
                    }
                    None => {
                        if let Some(ix) = ix.as_deref_mut() {
                            ix.remove_posting(field, value, &id);
                        }
                    }
                }
            }
            return results;
        }

        let expired: Vec<String> = coll
            .iter()
            .filter(|(_, doc)| is_expired(doc, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            purge(coll, indexes.get_mut(collection), id);
        }

        coll.values()
            .filter(|doc| doc.get(field) == Some(value))
            .cloned()
            .collect()
    }

    /// All live documents in a collection, removing expired ones on the way
    pub fn get_all(&self, collection: &str) -> Vec<Document> {
        let now = now_millis();
        let mut state = self.state.lock();
        let EngineState {
            collections,
            indexes,
        } = &mut *state;

        let Some(coll) = collections.get_mut(collection) else {
            return Vec::new();
        };

        let expired: Vec<String> = coll
            .iter()
            .filter(|(_, doc)| is_expired(doc, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            purge(coll, indexes.get_mut(collection), id);
        }

        coll.values().cloned().collect()
    }

    /// Register a secondary index on `(collection, field)` and backfill it
    ///
    /// Idempotent; returns false if the index already existed. Backfill
    /// covers every currently stored non-expired document.
    pub fn create_index(&self, collection: &str, field: &str) -> bool {
        let now = now_millis();
        let mut state = self.state.lock();
        let EngineState {
            collections,
            indexes,
        } = &mut *state;

        let ix = indexes.entry(collection.to_string()).or_default();
        if !ix.create_field(field) {
            return false;
        }

        if let Some(coll) = collections.get(collection) {
            for (id, doc) in coll {
                if is_expired(doc, now) {
                    continue;
                }
                if let Some(value) = doc.get(field) {
                    ix.add_posting(field, value, id);
                }
            }
        }
        debug!(collection, field, "Created secondary index");
        true
    }

    /// Deep copy of all collections, taken under the lock
    pub fn snapshot_view(&self) -> StoreState {
        self.state.lock().collections.clone()
    }

    /// Run `f` over the state while holding the engine lock
    ///
    /// The snapshot manager uses this so that capture, checkpoint, and WAL
    /// rotation form one critical section with no interleaved inserts.
    pub fn with_state<R>(&self, f: impl FnOnce(&StoreState) -> Result<R>) -> Result<R> {
        let state = self.state.lock();
        f(&state.collections)
    }

    /// Replace all collections and rebuild every registered index
    ///
    /// Indexes are derived and never persisted; the set of registered
    /// fields survives, their postings are rebuilt from the new state.
    pub fn restore(&self, new_state: StoreState) {
        let now = now_millis();
        let mut state = self.state.lock();
        state.collections = new_state;

        let EngineState {
            collections,
            indexes,
        } = &mut *state;
        for (collection, ix) in indexes.iter_mut() {
            match collections.get(collection) {
                Some(coll) => {
                    ix.rebuild(coll.iter().filter(|(_, doc)| !is_expired(doc, now)));
                }
                None => ix.rebuild(std::iter::empty()),
            }
        }
        debug!(collections = state.collections.len(), "Restored engine state");
    }

    /// Cold-start recovery: replay the whole WAL into the empty engine
    ///
    /// Returns the number of entries applied. Malformed records were already
    /// skipped at the WAL layer.
    pub fn recover_from_wal(&self) -> Result<usize> {
        self.wal.recover_full(|entry| {
            if let Err(e) = self.insert(&entry.collection, &entry.id, entry.document, false) {
                warn!(
                    collection = %entry.collection,
                    id = %entry.id,
                    error = %e,
                    "Failed to re-apply recovered WAL entry"
                );
            }
        })
    }

    /// The WAL this engine journals to
    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }
}

/// Remove a document and every index posting it contributed
fn purge(coll: &mut Collection, ix: Option<&mut FieldIndexes>, id: &str) {
    if let Some(doc) = coll.remove(id) {
        if let Some(ix) = ix {
            ix.remove_document(id, &doc);
        }
        debug!(id, "Removed expired document");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(tmp: &TempDir) -> StorageEngine {
        let wal = Wal::open(tmp.path().join("wal.log"), 1024 * 1024, 3).unwrap();
        StorageEngine::new(Arc::new(wal))
    }

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_insert_and_get() {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);

        eng.insert("users", "u1", doc(&[("name", Value::from("Alice"))]), true)
            .unwrap();

        let got = eng.get_by_id("users", "u1").unwrap();
        assert_eq!(got.get("name"), Some(&Value::from("Alice")));
        assert!(eng.get_by_id("users", "u2").is_none());
        assert!(eng.get_by_id("ghosts", "u1").is_none());
    }

    #[test]
    fn test_insert_overwrites() {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);

        eng.insert("users", "u1", doc(&[("age", Value::Int(30))]), true)
            .unwrap();
        eng.insert("users", "u1", doc(&[("age", Value::Int(31))]), true)
            .unwrap();

        let got = eng.get_by_id("users", "u1").unwrap();
        assert_eq!(got.get("age"), Some(&Value::Int(31)));
        assert_eq!(eng.get_all("users").len(), 1);
    }

    #[test]
    fn test_ttl_field_becomes_expiry() {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);

        let before = now_millis();
        eng.insert(
            "users",
            "u1",
            doc(&[("name", Value::from("Bob")), (TTL_FIELD, Value::Int(60_000))]),
            true,
        )
        .unwrap();

        let got = eng.get_by_id("users", "u1").unwrap();
        assert!(got.get(TTL_FIELD).is_none());
        let expiry = got.get(EXPIRY_FIELD).and_then(Value::as_millis).unwrap();
        assert!(expiry >= before + 60_000);
    }

    #[test]
    fn test_maximal_ttl_saturates_instead_of_overflowing() {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);

        eng.insert(
            "users",
            "u1",
            doc(&[("name", Value::from("Alice")), (TTL_FIELD, Value::Int(i64::MAX))]),
            true,
        )
        .unwrap();

        let got = eng.get_by_id("users", "u1").unwrap();
        assert_eq!(got.get(EXPIRY_FIELD), Some(&Value::Int(i64::MAX)));
    }

    #[test]
    fn test_expired_document_removed_on_read() {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);

        // Already expired when inserted
        eng.insert(
            "users",
            "u1",
            doc(&[("name", Value::from("Bob")), (EXPIRY_FIELD, Value::Int(1))]),
            true,
        )
        .unwrap();

        assert!(eng.get_by_id("users", "u1").is_none());
        // Physically gone now, not just filtered
        assert!(eng.snapshot_view().get("users").unwrap().get("u1").is_none());
    }

    #[test]
    fn test_query_full_scan() {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);

        eng.insert("users", "u1", doc(&[("age", Value::Int(30))]), true)
            .unwrap();
        eng.insert("users", "u2", doc(&[("age", Value::Int(30))]), true)
            .unwrap();
        eng.insert("users", "u3", doc(&[("age", Value::Int(25))]), true)
            .unwrap();

        let results = eng.query_by_field("users", "age", &Value::Int(30));
        assert_eq!(results.len(), 2);
        assert!(eng.query_by_field("users", "age", &Value::Int(99)).is_empty());
        assert!(eng.query_by_field("nobody", "age", &Value::Int(30)).is_empty());
    }

    #[test]
    fn test_query_strict_type_equality() {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);

        eng.insert("users", "u1", doc(&[("n", Value::Int(1))]), true)
            .unwrap();

        assert_eq!(eng.query_by_field("users", "n", &Value::Int(1)).len(), 1);
        assert!(eng.query_by_field("users", "n", &Value::Float(1.0)).is_empty());
        assert!(eng.query_by_field("users", "n", &Value::from("1")).is_empty());
    }

    #[test]
    fn test_indexed_query_matches_full_scan() {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);

        eng.insert("users", "u1", doc(&[("city", Value::from("Oslo"))]), true)
            .unwrap();
        eng.insert("users", "u2", doc(&[("city", Value::from("Oslo"))]), true)
            .unwrap();
        eng.insert("users", "u3", doc(&[("city", Value::from("Bergen"))]), true)
            .unwrap();

        let scanned = eng.query_by_field("users", "city", &Value::from("Oslo"));
        assert!(eng.create_index("users", "city"));
        let indexed = eng.query_by_field("users", "city", &Value::from("Oslo"));

        assert_eq!(scanned.len(), 2);
        assert_eq!(indexed.len(), 2);
    }

    #[test]
    fn test_create_index_idempotent_and_backfilled() {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);

        eng.insert("users", "u1", doc(&[("age", Value::Int(30))]), true)
            .unwrap();
        assert!(eng.create_index("users", "age"));
        assert!(!eng.create_index("users", "age"));

        // Backfill covers the pre-existing document
        assert_eq!(eng.query_by_field("users", "age", &Value::Int(30)).len(), 1);
    }

    #[test]
    fn test_index_maintained_on_overwrite() {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);

        eng.create_index("users", "age");
        eng.insert("users", "u1", doc(&[("age", Value::Int(30))]), true)
            .unwrap();
        eng.insert("users", "u1", doc(&[("age", Value::Int(31))]), true)
            .unwrap();

        assert!(eng.query_by_field("users", "age", &Value::Int(30)).is_empty());
        assert_eq!(eng.query_by_field("users", "age", &Value::Int(31)).len(), 1);
    }

    #[test]
    fn test_index_repaired_on_expiry() {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);

        eng.create_index("users", "age");
        eng.insert(
            "users",
            "u1",
            doc(&[("age", Value::Int(30)), (EXPIRY_FIELD, Value::Int(1))]),
            true,
        )
        .unwrap();
        eng.insert("users", "u2", doc(&[("age", Value::Int(30))]), true)
            .unwrap();

        let results = eng.query_by_field("users", "age", &Value::Int(30));
        assert_eq!(results.len(), 1);
        // A second query sees the repaired index, same answer
        assert_eq!(eng.query_by_field("users", "age", &Value::Int(30)).len(), 1);
    }

    #[test]
    fn test_recover_from_wal() {
        let tmp = TempDir::new().unwrap();
        {
            let eng = engine(&tmp);
            eng.insert("users", "u1", doc(&[("name", Value::from("Alice"))]), true)
                .unwrap();
            eng.insert("users", "u1", doc(&[("name", Value::from("Alicia"))]), true)
                .unwrap();
            eng.insert("pets", "p1", doc(&[("name", Value::from("Rex"))]), true)
                .unwrap();
        }

        let eng = engine(&tmp);
        assert_eq!(eng.recover_from_wal().unwrap(), 3);
        assert_eq!(
            eng.get_by_id("users", "u1").unwrap().get("name"),
            Some(&Value::from("Alicia"))
        );
        assert!(eng.get_by_id("pets", "p1").is_some());
    }

    #[test]
    fn test_restore_rebuilds_indexes() {
        let tmp = TempDir::new().unwrap();
        let eng = engine(&tmp);

        eng.create_index("users", "age");
        eng.insert("users", "u1", doc(&[("age", Value::Int(30))]), true)
            .unwrap();

        let mut fresh: StoreState = HashMap::new();
        let mut coll = Collection::new();
        coll.insert("u9".to_string(), doc(&[("age", Value::Int(40))]));
        fresh.insert("users".to_string(), coll);

        eng.restore(fresh);

        assert!(eng.query_by_field("users", "age", &Value::Int(30)).is_empty());
        assert_eq!(eng.query_by_field("users", "age", &Value::Int(40)).len(), 1);
        assert!(eng.get_by_id("users", "u1").is_none());
    }
}
