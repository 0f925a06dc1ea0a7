//! Seam for the external query language.
//!
//! The engine never implements the grammar itself: it hands filter text to a
//! [`QueryLanguage`] implementation, evaluates the returned [`ParsedQuery`]
//! against structured records (namespaces, pods, log rows), and — for the
//! database backend — asks the same parsed query to compile itself to SQL
//! against the source's declared column set. The column map is the only
//! metadata this crate supplies to the compiler.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::model::source::SourceColumn;

/// Structured record handed to the evaluator: a flat or nested JSON mapping.
pub type Record = Value;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
        }
    }
}

/// Raised when a parsed query cannot be compiled against a column set
/// (unknown field, unsupported operator for the column kind).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> CompileError {
        CompileError {
            message: message.into(),
        }
    }
}

/// A parsed filter expression. Opaque to the engine.
pub trait ParsedQuery: Send + Sync {
    /// Evaluate the expression against one structured record.
    fn matches(&self, record: &Record) -> bool;

    /// Compile the expression to a backend predicate using the given column
    /// metadata.
    fn to_sql(&self, columns: &BTreeMap<String, SourceColumn>) -> Result<String, CompileError>;
}

/// The parser side of the collaborator.
pub trait QueryLanguage: Send + Sync {
    fn parse(&self, text: &str) -> Result<Arc<dyn ParsedQuery>, ParseError>;
}

/// Parse optional filter text: empty input means "no filter".
pub fn parse_optional(
    language: &dyn QueryLanguage,
    text: &str,
) -> Result<Option<Arc<dyn ParsedQuery>>, ParseError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    language.parse(text).map(Some)
}

/// Resolve a dotted path (`labels.team`) inside a record.
pub fn record_path<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}
