//! The fetcher facade: one operation set implemented per source kind.

pub mod clickhouse;
pub mod graph;
pub mod kubernetes;

use async_trait::async_trait;
use chrono::FixedOffset;

use crate::errors::EngineError;
use crate::fetch::clickhouse::ClickhouseFetcher;
use crate::fetch::kubernetes::KubernetesFetcher;
use crate::model::request::{AutocompleteRequest, DataRequest, GraphDataRequest};
use crate::model::response::{
    AutocompleteResponse, ConnectionTestNgResponse, ConnectionTestResponse, DataAndGraphResponse,
    DataResponse, GraphDataResponse,
};
use crate::model::source::{Source, SourceColumn};

/// The polymorphic operation set every backend implements.
///
/// Fetch operations never raise backend failures past this boundary: a
/// response carries an optional error/message instead, so the caller can
/// render partial results plus a warning. Only configuration and parse
/// errors propagate as hard failures.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn validate_query(&self, source: &Source, query: &str) -> (bool, Option<String>);

    async fn test_connection(&self, source: &Source) -> ConnectionTestResponse;

    async fn test_connection_ng(&self, source: &Source) -> ConnectionTestNgResponse;

    async fn get_schema(&self, source: &Source) -> anyhow::Result<Vec<SourceColumn>>;

    async fn autocomplete(
        &self,
        request: &AutocompleteRequest,
    ) -> anyhow::Result<AutocompleteResponse>;

    async fn fetch_data(
        &self,
        request: &DataRequest,
        tz: FixedOffset,
    ) -> Result<DataResponse, EngineError>;

    async fn fetch_graph_data(
        &self,
        request: &GraphDataRequest,
    ) -> Result<GraphDataResponse, EngineError>;

    /// One logical retrieval feeding both the row view and the aggregator —
    /// never two independent fetches.
    async fn fetch_data_and_graph(
        &self,
        request: &GraphDataRequest,
        tz: FixedOffset,
    ) -> Result<DataAndGraphResponse, EngineError>;
}

/// Kind-dispatched fetcher handed out by the engine. One enumerated variant
/// per backend; dispatch is always an explicit match.
pub enum SourceFetcher {
    Clickhouse(ClickhouseFetcher),
    Kubernetes(KubernetesFetcher),
}

#[async_trait]
impl Fetcher for SourceFetcher {
    async fn validate_query(&self, source: &Source, query: &str) -> (bool, Option<String>) {
        match self {
            SourceFetcher::Clickhouse(fetcher) => fetcher.validate_query(source, query).await,
            SourceFetcher::Kubernetes(fetcher) => fetcher.validate_query(source, query).await,
        }
    }

    async fn test_connection(&self, source: &Source) -> ConnectionTestResponse {
        match self {
            SourceFetcher::Clickhouse(fetcher) => fetcher.test_connection(source).await,
            SourceFetcher::Kubernetes(fetcher) => fetcher.test_connection(source).await,
        }
    }

    async fn test_connection_ng(&self, source: &Source) -> ConnectionTestNgResponse {
        match self {
            SourceFetcher::Clickhouse(fetcher) => fetcher.test_connection_ng(source).await,
            SourceFetcher::Kubernetes(fetcher) => fetcher.test_connection_ng(source).await,
        }
    }

    async fn get_schema(&self, source: &Source) -> anyhow::Result<Vec<SourceColumn>> {
        match self {
            SourceFetcher::Clickhouse(fetcher) => fetcher.get_schema(source).await,
            SourceFetcher::Kubernetes(fetcher) => fetcher.get_schema(source).await,
        }
    }

    async fn autocomplete(
        &self,
        request: &AutocompleteRequest,
    ) -> anyhow::Result<AutocompleteResponse> {
        match self {
            SourceFetcher::Clickhouse(fetcher) => fetcher.autocomplete(request).await,
            SourceFetcher::Kubernetes(fetcher) => fetcher.autocomplete(request).await,
        }
    }

    async fn fetch_data(
        &self,
        request: &DataRequest,
        tz: FixedOffset,
    ) -> Result<DataResponse, EngineError> {
        match self {
            SourceFetcher::Clickhouse(fetcher) => fetcher.fetch_data(request, tz).await,
            SourceFetcher::Kubernetes(fetcher) => fetcher.fetch_data(request, tz).await,
        }
    }

    async fn fetch_graph_data(
        &self,
        request: &GraphDataRequest,
    ) -> Result<GraphDataResponse, EngineError> {
        match self {
            SourceFetcher::Clickhouse(fetcher) => fetcher.fetch_graph_data(request).await,
            SourceFetcher::Kubernetes(fetcher) => fetcher.fetch_graph_data(request).await,
        }
    }

    async fn fetch_data_and_graph(
        &self,
        request: &GraphDataRequest,
        tz: FixedOffset,
    ) -> Result<DataAndGraphResponse, EngineError> {
        match self {
            SourceFetcher::Clickhouse(fetcher) => fetcher.fetch_data_and_graph(request, tz).await,
            SourceFetcher::Kubernetes(fetcher) => fetcher.fetch_data_and_graph(request, tz).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::source::SourceKind;
    use crate::testing::{
        clickhouse_source, kubeconfig_yaml, kubernetes_source, test_engine, StubClusterFactory,
    };

    #[tokio::test]
    async fn dispatch_follows_the_source_kind() {
        let engine = test_engine(StubClusterFactory::default());

        // The database fetcher compiles filters against the column set...
        let fetcher = engine.clone().fetcher(SourceKind::Clickhouse);
        let (ok, message) = fetcher
            .validate_query(&clickhouse_source(), "nope=\"x\"")
            .await;
        assert!(!ok);
        assert!(message.unwrap().contains("unknown field"));

        // ...while the log fetcher only parses them.
        let yaml = kubeconfig_yaml(&["a"], None);
        let fetcher = engine.fetcher(SourceKind::Kubernetes);
        let (ok, message) = fetcher
            .validate_query(&kubernetes_source(&yaml, ""), "nope=\"x\"")
            .await;
        assert!(ok);
        assert!(message.is_none());
    }
}
