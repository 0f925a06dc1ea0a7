use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

/// Hard failures that abort a request before any fan-out starts.
///
/// Everything else (a single context or namespace failing, an empty result
/// set, a truncated row list) is reported inside the response instead of
/// being raised past the fetcher boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("query parse error: {0}")]
    Parse(String),
}

impl EngineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        EngineError::Configuration(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        EngineError::Parse(msg.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warn,
    Fatal,
}

/// A failure scoped to one fan-out partition (context, namespace, pod or
/// container). Accumulated on the request, never aborts sibling partitions.
#[derive(Debug, Clone, Serialize)]
pub struct FetchError {
    pub operation: String,
    pub severity: Severity,
    pub details: BTreeMap<String, String>,
}

impl FetchError {
    pub fn warn(operation: impl Into<String>, details: BTreeMap<String, String>) -> Self {
        FetchError {
            operation: operation.into(),
            severity: Severity::Warn,
            details,
        }
    }

    pub fn fatal(operation: impl Into<String>, details: BTreeMap<String, String>) -> Self {
        FetchError {
            operation: operation.into(),
            severity: Severity::Fatal,
            details,
        }
    }

    /// Human-readable rendering used when an aggregate-empty result has to
    /// explain itself to the caller.
    pub fn describe(&self) -> String {
        let details = self
            .details
            .iter()
            .map(|(key, msg)| format!("{}: {}", key, msg))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}: {}", self.operation, details)
    }
}

pub fn describe_errors(errors: &[FetchError]) -> String {
    errors
        .iter()
        .map(FetchError::describe)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_renders_operation_and_details() {
        let mut details = BTreeMap::new();
        details.insert("prod-a".to_string(), "connection refused".to_string());
        let err = FetchError::warn("get_namespaces", details);
        assert_eq!(err.describe(), "get_namespaces: prod-a: connection refused");
    }
}
