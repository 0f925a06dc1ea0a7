use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::fetch::graph::GraphData;
use crate::model::row::Row;
use crate::model::source::SourceColumn;

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataResponse {
    pub rows: Vec<Row>,
    /// Request-level soft failure (empty aggregate result, partial fetch
    /// diagnostics). Present alongside whatever rows were produced.
    pub error: Option<String>,
    /// Informational notice, e.g. the row limit truncating results.
    pub message: Option<String>,
}

impl DataResponse {
    pub fn with_error(error: impl Into<String>) -> DataResponse {
        DataResponse {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphDataResponse {
    pub timestamps: Vec<i64>,
    pub data: std::collections::BTreeMap<String, Vec<u64>>,
    pub total: u64,
    /// Request-level soft failure; the series fields stay empty.
    pub error: Option<String>,
}

impl GraphDataResponse {
    pub fn with_error(error: impl Into<String>) -> GraphDataResponse {
        GraphDataResponse {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

impl From<GraphData> for GraphDataResponse {
    fn from(graph: GraphData) -> GraphDataResponse {
        GraphDataResponse {
            timestamps: graph.timestamps,
            data: graph.data,
            total: graph.total,
            error: None,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataAndGraphResponse {
    pub rows: Vec<Row>,
    pub graph: GraphDataResponse,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl DataAndGraphResponse {
    pub fn with_error(error: impl Into<String>) -> DataAndGraphResponse {
        DataAndGraphResponse {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AutocompleteResponse {
    pub items: Vec<String>,
    /// True when the result hit the cap and more matches may exist.
    pub incomplete: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReachabilityReport {
    pub result: bool,
    pub error: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaReport {
    pub result: bool,
    pub error: Option<String>,
    pub data: Vec<SourceColumn>,
    /// Backend-native schema text (e.g. SHOW CREATE TABLE) when available.
    pub raw: Option<String>,
}

/// Structured reachability-plus-schema report returned by test_connection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionTestResponse {
    pub reachability: ReachabilityReport,
    pub schema: SchemaReport,
}

/// Compact connection probe. For Kubernetes sources the context counts are
/// populated so the caller can tell "unreachable" from "filter matched
/// nothing".
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionTestNgResponse {
    pub result: bool,
    pub error: Option<String>,
    pub total_contexts: Option<usize>,
    pub matched_contexts: Option<Vec<crate::core::client::kube_config::ClusterContext>>,
}
