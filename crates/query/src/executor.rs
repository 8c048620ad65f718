//! Query execution against the storage engine
//!
//! Responses are plain JSON: a point lookup answers with the bare document
//! object, filter and compound queries answer with `{"results": [...]}`.

use crate::parser::{self, ParsedQuery};
use docbase_core::{Error, Result};
use docbase_engine::StorageEngine;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Executes parsed queries against one engine
pub struct QueryExecutor {
    engine: Arc<StorageEngine>,
}

impl QueryExecutor {
    /// Executor over `engine`
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self { engine }
    }

    /// Parse and execute a raw JSON query string
    pub fn execute_raw(&self, raw: &str) -> Result<serde_json::Value> {
        let query = parser::parse(raw)?;
        self.execute(&query)
    }

    /// Execute a parsed query
    ///
    /// Compound queries flatten every sub-filter's hits into one `results`
    /// array; `$and` and `$or` therefore both behave as a union, and a
    /// document matching several conditions appears once per match. This
    /// mirrors the historical behavior callers depend on.
    pub fn execute(&self, query: &ParsedQuery) -> Result<serde_json::Value> {
        match query {
            ParsedQuery::GetById { collection, id } => {
                let doc = self.engine.get_by_id(collection, id).ok_or_else(|| {
                    Error::NotFound(format!("document '{id}' in collection '{collection}'"))
                })?;
                Ok(serde_json::to_value(doc)?)
            }
            ParsedQuery::Filter(filter) => {
                let docs =
                    self.engine
                        .query_by_field(&filter.collection, &filter.field, &filter.value);
                debug!(
                    collection = %filter.collection,
                    field = %filter.field,
                    hits = docs.len(),
                    "Executed filter query"
                );
                Ok(json!({ "results": docs }))
            }
            ParsedQuery::Compound { filters, .. } => {
                let mut results = Vec::new();
                for filter in filters {
                    results.extend(self.engine.query_by_field(
                        &filter.collection,
                        &filter.field,
                        &filter.value,
                    ));
                }
                Ok(json!({ "results": results }))
            }
        }
    }
}
