//! JSON query grammar parser
//!
//! A query is one JSON object. Interpretation rules, in order:
//!
//! 1. `collection` is required; a missing or non-string value is malformed.
//! 2. An `id` key makes it a point lookup.
//! 3. A `$and` or `$or` key makes it a compound query; its value must be an
//!    array of objects carrying exactly one key each, one filter per object.
//! 4. Otherwise the first key other than `collection` becomes a single
//!    equality filter. Which key is "first" is unspecified when several are
//!    present; callers should send one.
//! 5. An object with nothing but `collection` is malformed.

use docbase_core::{Error, Result, Value};

/// Combination operator of a compound query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    /// `$and`
    And,
    /// `$or`
    Or,
}

/// One equality condition: `collection.field == value`
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Target collection
    pub collection: String,
    /// Field name to compare
    pub field: String,
    /// Value the field must hold, exactly
    pub value: Value,
}

/// A parsed query, ready for execution
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedQuery {
    /// Point lookup by document ID
    GetById {
        /// Target collection
        collection: String,
        /// Document ID
        id: String,
    },
    /// Single equality filter
    Filter(Filter),
    /// Flat combination of equality filters
    Compound {
        /// Combination operator
        op: CompoundOp,
        /// The conditions, one per array element
        filters: Vec<Filter>,
    },
}

/// Parse a raw JSON query string
pub fn parse(raw: &str) -> Result<ParsedQuery> {
    let json: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Error::MalformedQuery(format!("invalid JSON: {e}")))?;
    parse_json(&json)
}

/// Parse an already-decoded JSON query
pub fn parse_json(json: &serde_json::Value) -> Result<ParsedQuery> {
    let obj = json
        .as_object()
        .ok_or_else(|| Error::MalformedQuery("query must be a JSON object".to_string()))?;

    let collection = obj
        .get("collection")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            Error::MalformedQuery("query requires a string 'collection' field".to_string())
        })?
        .to_string();

    if let Some(id) = obj.get("id") {
        let id = id
            .as_str()
            .ok_or_else(|| Error::MalformedQuery("'id' must be a string".to_string()))?;
        return Ok(ParsedQuery::GetById {
            collection,
            id: id.to_string(),
        });
    }

    for (key, op) in [("$and", CompoundOp::And), ("$or", CompoundOp::Or)] {
        if let Some(conditions) = obj.get(key) {
            let filters = parse_conditions(&collection, key, conditions)?;
            return Ok(ParsedQuery::Compound { op, filters });
        }
    }

    for (key, raw_value) in obj {
        if key == "collection" {
            continue;
        }
        return Ok(ParsedQuery::Filter(Filter {
            collection,
            field: key.clone(),
            value: to_value(raw_value)?,
        }));
    }

    Err(Error::MalformedQuery(
        "query has no id, filter, or compound condition".to_string(),
    ))
}

fn parse_conditions(
    collection: &str,
    key: &str,
    conditions: &serde_json::Value,
) -> Result<Vec<Filter>> {
    let items = conditions
        .as_array()
        .ok_or_else(|| Error::MalformedQuery(format!("'{key}' must be an array")))?;

    let mut filters = Vec::with_capacity(items.len());
    for item in items {
        let obj = item.as_object().ok_or_else(|| {
            Error::MalformedQuery(format!("each '{key}' condition must be an object"))
        })?;
        if obj.len() != 1 {
            return Err(Error::MalformedQuery(format!(
                "each '{key}' condition must have exactly one key, got {}",
                obj.len()
            )));
        }
        // len() == 1 makes this irrefutable
        if let Some((field, raw_value)) = obj.iter().next() {
            filters.push(Filter {
                collection: collection.to_string(),
                field: field.clone(),
                value: to_value(raw_value)?,
            });
        }
    }
    Ok(filters)
}

fn to_value(raw: &serde_json::Value) -> Result<Value> {
    serde_json::from_value(raw.clone())
        .map_err(|e| Error::MalformedQuery(format!("unsupported filter value: {e}")))
}
