//! Query language for docbase
//!
//! A minimal JSON grammar: point lookups by ID, single-field equality
//! filters, and flat `$and`/`$or` compounds. The parser produces a
//! [`ParsedQuery`] sum type; the executor translates it into storage engine
//! calls and shapes the JSON response.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod executor;
pub mod parser;

pub use executor::QueryExecutor;
pub use parser::{CompoundOp, Filter, ParsedQuery};
