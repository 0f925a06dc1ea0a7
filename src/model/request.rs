use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::source::Source;

/// Per-request Kubernetes narrowing supplied by the caller alongside the
/// query itself: explicit context/namespace picks and pod-level selection.
/// Empty fields mean "no narrowing at that level".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestScope {
    pub contexts: Vec<String>,
    pub namespaces: Vec<String>,
    pub pods_label_selector: String,
    pub pods_field_selector: String,
    pub pods_filter: String,
}

impl RequestScope {
    pub fn selected_contexts(&self) -> BTreeSet<String> {
        normalize_selection(&self.contexts)
    }

    pub fn selected_namespaces(&self) -> BTreeSet<String> {
        normalize_selection(&self.namespaces)
    }
}

/// Callers sometimes hand a single comma-separated entry instead of a list;
/// accept both.
fn normalize_selection(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct DataRequest {
    pub source: Source,
    /// Query-language filter text; empty means match-all.
    pub query: String,
    /// Raw predicate ANDed verbatim into generated SQL (database kind only).
    pub raw_query: String,
    /// Inclusive window bounds, epoch milliseconds.
    pub time_from: i64,
    pub time_to: i64,
    pub limit: usize,
    pub scope: RequestScope,
}

#[derive(Debug, Clone)]
pub struct GraphDataRequest {
    pub source: Source,
    pub query: String,
    pub raw_query: String,
    pub time_from: i64,
    pub time_to: i64,
    pub limit: usize,
    /// Column names to group the series by; only the first entry is used.
    pub group_by: Vec<String>,
    pub scope: RequestScope,
}

impl GraphDataRequest {
    pub fn group_by_column(&self) -> Option<&str> {
        self.group_by.first().map(String::as_str)
    }

    pub fn as_data_request(&self) -> DataRequest {
        DataRequest {
            source: self.source.clone(),
            query: self.query.clone(),
            raw_query: self.raw_query.clone(),
            time_from: self.time_from,
            time_to: self.time_to,
            limit: self.limit,
            scope: self.scope.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AutocompleteRequest {
    pub source: Source,
    pub column: String,
    pub time_from: i64,
    pub time_to: i64,
    /// Substring the caller has typed so far.
    pub value: String,
}
