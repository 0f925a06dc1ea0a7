pub mod discovery;
pub mod logs;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::client::kube_config::KubeConfigBundle;
use crate::core::client::{DeploymentRecord, Selectors};
use crate::engine::FetchEngine;
use crate::errors::{describe_errors, EngineError};
use crate::fetch::graph::graph_from_rows;
use crate::fetch::kubernetes::discovery::{DiscoveryEngine, DiscoveryParams};
use crate::fetch::kubernetes::logs::{collect_logs, LogWindow};
use crate::fetch::Fetcher;
use crate::model::request::{AutocompleteRequest, DataRequest, GraphDataRequest, RequestScope};
use crate::model::response::{
    AutocompleteResponse, ConnectionTestNgResponse, ConnectionTestResponse, DataAndGraphResponse,
    DataResponse, GraphDataResponse,
};
use crate::model::row::Row;
use crate::model::source::{Source, SourceColumn};
use crate::query::{parse_optional, ParsedQuery};

/// One structured log line, normalized to UTC and enriched with the pod
/// topology it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub context: String,
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub node: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Column order of every log-backed row.
const SELECTED_COLUMNS: [&str; 10] = [
    "time",
    "context",
    "namespace",
    "pod",
    "container",
    "node",
    "labels",
    "annotations",
    "message",
    "status",
];

/// The fixed schema of a Kubernetes log source.
pub fn schema_columns() -> Vec<SourceColumn> {
    vec![
        SourceColumn::new("time", "DateTime"),
        SourceColumn::new("context", "String").without_autocomplete(),
        SourceColumn::new("namespace", "String").without_autocomplete(),
        SourceColumn::new("pod", "String").without_autocomplete(),
        SourceColumn::new("container", "String").without_autocomplete(),
        SourceColumn::new("node", "String").without_autocomplete(),
        SourceColumn::new("labels", "JSON").without_autocomplete(),
        SourceColumn::new("annotations", "JSON").without_autocomplete(),
        SourceColumn::new("message", "String").without_autocomplete(),
        SourceColumn::new("status", "String").without_autocomplete(),
    ]
}

/// One pod of the discovery preview handed to the UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct PodPreview {
    pub context: String,
    pub namespace: String,
    pub pod_name: String,
    pub containers: Vec<String>,
    pub status: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

enum Gathered {
    /// Zero namespaces or pods matched; the reason is reported as a soft
    /// error alongside an empty result.
    Empty(String),
    Logs {
        entries: Vec<LogEntry>,
        log_errors: BTreeMap<String, String>,
    },
}

pub struct KubernetesFetcher {
    engine: Arc<FetchEngine>,
}

impl KubernetesFetcher {
    pub fn new(engine: Arc<FetchEngine>) -> KubernetesFetcher {
        KubernetesFetcher { engine }
    }

    fn discovery(
        &self,
        source: &Source,
        scope: &RequestScope,
    ) -> Result<DiscoveryEngine, EngineError> {
        source.connection.validate()?;
        let conn = source.kubernetes_connection()?;
        let bundle = Arc::new(KubeConfigBundle::load(conn)?);
        let params = DiscoveryParams {
            conn_id: source.connection_id,
            source_id: source.id,
            max_concurrent_requests: conn.max_concurrent_requests,
            context_filter: conn.context_filter.clone(),
            namespace_label_selector: source.kubernetes.namespace_label_selector.clone(),
            namespace_field_selector: source.kubernetes.namespace_field_selector.clone(),
            namespace_filter: source.kubernetes.namespace_filter.clone(),
            pods_label_selector: scope.pods_label_selector.trim().to_string(),
            pods_field_selector: scope.pods_field_selector.trim().to_string(),
            pods_filter: scope.pods_filter.clone(),
            selected_contexts: scope.selected_contexts(),
            selected_namespaces: scope.selected_namespaces(),
        };
        DiscoveryEngine::new(self.engine.clone(), bundle, params)
    }

    /// One discovery-and-log pass: resolve contexts, walk namespaces and
    /// pods (failing soft when the aggregate is empty), then pull logs for
    /// every container of the topology.
    async fn gather(
        &self,
        source: &Source,
        scope: &RequestScope,
        time_from: i64,
        time_to: i64,
    ) -> Result<Gathered, EngineError> {
        let discovery = self.discovery(source, scope)?;
        let contexts = discovery.resolve_contexts().await?;

        let namespaces = discovery.namespaces(&contexts).await;
        let total_namespaces: usize = namespaces.values().map(Vec::len).sum();
        if total_namespaces == 0 {
            let errors = discovery.errors();
            let reason = if errors.is_empty() {
                "No namespaces found matching the filters".to_string()
            } else {
                format!("Failed to fetch namespaces: {}", describe_errors(&errors))
            };
            return Ok(Gathered::Empty(reason));
        }

        let pods = discovery.pods(&contexts).await;
        let total_pods: usize = pods
            .values()
            .flat_map(|namespaces| namespaces.values())
            .map(|pods| pods.len())
            .sum();
        if total_pods == 0 {
            return Ok(Gathered::Empty(
                "No pods found matching the filters".to_string(),
            ));
        }

        info!(
            "fetching logs: contexts={}, namespaces={}, pods={}",
            contexts.len(),
            total_namespaces,
            total_pods
        );

        let window = LogWindow {
            time_from: millis_to_utc(time_from)?,
            time_to: millis_to_utc(time_to)?,
            since_seconds: since_seconds(time_from),
            tail_lines: 0,
        };

        let (entries, log_errors) = collect_logs(
            pods,
            window,
            self.engine.settings.context_fanout,
            discovery.max_concurrent_requests(),
            |context: String| {
                let discovery = &discovery;
                async move { discovery.client_for(&context).await }
            },
        )
        .await;

        if !log_errors.is_empty() {
            warn!("log fetch errors: {:?}", log_errors);
        }
        info!("total log entries fetched: {}", entries.len());

        Ok(Gathered::Logs {
            entries,
            log_errors,
        })
    }

    fn rows_from_entries(
        entries: Vec<LogEntry>,
        filter: Option<&Arc<dyn ParsedQuery>>,
        tz: FixedOffset,
    ) -> Vec<Row> {
        let columns = Arc::new(
            SELECTED_COLUMNS
                .iter()
                .map(|name| name.to_string())
                .collect::<Vec<_>>(),
        );
        entries
            .into_iter()
            .filter_map(|entry| {
                let values = vec![
                    Value::String(
                        entry
                            .timestamp
                            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                    ),
                    Value::String(entry.context),
                    Value::String(entry.namespace),
                    Value::String(entry.pod),
                    Value::String(entry.container),
                    Value::String(entry.node),
                    serde_json::to_value(&entry.labels).unwrap_or(Value::Null),
                    serde_json::to_value(&entry.annotations).unwrap_or(Value::Null),
                    Value::String(entry.message),
                    Value::String(entry.status),
                ];
                let row = Row::new(
                    Uuid::new_v4().to_string(),
                    columns.clone(),
                    values,
                    Some(entry.timestamp),
                    tz,
                );
                match filter {
                    Some(filter) if !filter.matches(&row.record()) => None,
                    _ => Some(row),
                }
            })
            .collect()
    }

    async fn probe(&self, discovery: &DiscoveryEngine) -> anyhow::Result<()> {
        let allowed = discovery.allowed_contexts().await;
        if allowed.is_empty() {
            anyhow::bail!("No contexts available");
        }
        let target = discovery
            .bundle()
            .current_context
            .as_ref()
            .filter(|current| allowed.iter().any(|ctx| &&ctx.name == current))
            .cloned()
            .unwrap_or_else(|| allowed[0].name.clone());

        let client = discovery.client_for(&target).await?;
        client.list_namespaces(&Selectors::default()).await?;
        Ok(())
    }

    /// Allowed context names for source configuration UIs.
    pub async fn context_values(&self, source: &Source) -> Result<Vec<String>, EngineError> {
        let discovery = self.discovery(source, &RequestScope::default())?;
        let allowed = discovery.allowed_contexts().await;
        Ok(allowed.iter().map(|ctx| ctx.name.clone()).collect())
    }

    /// Merged, sorted namespace list across the resolved contexts.
    pub async fn namespace_values(&self, source: &Source) -> Result<Vec<String>, EngineError> {
        let discovery = self.discovery(source, &RequestScope::default())?;
        let contexts = discovery.resolve_contexts().await?;
        let namespaces = discovery.namespaces(&contexts).await;
        let mut merged: Vec<String> = namespaces
            .into_values()
            .flatten()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        merged.sort();
        Ok(merged)
    }

    /// Deployment inventory across the resolved contexts.
    pub async fn deployment_inventory(
        &self,
        source: &Source,
    ) -> Result<Vec<DeploymentRecord>, EngineError> {
        let discovery = self.discovery(source, &RequestScope::default())?;
        let contexts = discovery.resolve_contexts().await?;
        Ok(discovery.deployments(&contexts).await)
    }

    /// Pod-level preview of what a request scope would select.
    pub async fn pods_preview(
        &self,
        source: &Source,
        scope: &RequestScope,
    ) -> Result<Vec<PodPreview>, EngineError> {
        let discovery = self.discovery(source, scope)?;
        let contexts = match discovery.resolve_contexts().await {
            Ok(contexts) => contexts,
            // Previews are best-effort; an invalid selection shows nothing.
            Err(_) => return Ok(Vec::new()),
        };
        let pods = discovery.pods(&contexts).await;
        let mut preview = Vec::new();
        for (context, namespaces) in pods {
            for (namespace, pods) in namespaces {
                for (pod_name, detail) in pods {
                    preview.push(PodPreview {
                        context: context.clone(),
                        namespace: namespace.clone(),
                        pod_name: pod_name.clone(),
                        containers: detail.containers.clone(),
                        status: detail.status.clone(),
                        labels: detail.labels.clone(),
                        annotations: detail.annotations.clone(),
                    });
                }
            }
        }
        preview.sort_by(|a, b| {
            (&a.context, &a.namespace, &a.pod_name).cmp(&(&b.context, &b.namespace, &b.pod_name))
        });
        Ok(preview)
    }
}

/// Partition failures stay out of the response while any rows came back;
/// once the whole result is empty they are the only explanation the caller
/// gets, so surface them.
fn empty_with_partition_errors(
    rows: &[Row],
    log_errors: &BTreeMap<String, String>,
) -> Option<String> {
    if rows.is_empty() && !log_errors.is_empty() {
        let details = log_errors
            .iter()
            .map(|(key, message)| format!("{}: {}", key, message))
            .collect::<Vec<_>>()
            .join("; ");
        Some(format!("Failed to fetch logs: {}", details))
    } else {
        None
    }
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, EngineError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| EngineError::configuration(format!("invalid timestamp: {}", ms)))
}

fn since_seconds(time_from_ms: i64) -> i64 {
    let now = Utc::now().timestamp_millis();
    ((now - time_from_ms) / 1000).max(0)
}

#[async_trait]
impl Fetcher for KubernetesFetcher {
    async fn validate_query(&self, _source: &Source, query: &str) -> (bool, Option<String>) {
        match parse_optional(self.engine.query_language.as_ref(), query) {
            Ok(_) => (true, None),
            Err(err) => (false, Some(err.message)),
        }
    }

    async fn test_connection(&self, source: &Source) -> ConnectionTestResponse {
        let mut response = ConnectionTestResponse::default();
        match self.discovery(source, &RequestScope::default()) {
            Ok(discovery) => match self.probe(&discovery).await {
                Ok(()) => response.reachability.result = true,
                Err(err) => response.reachability.error = Some(err.to_string()),
            },
            Err(err) => response.reachability.error = Some(err.to_string()),
        }
        // The log schema is fixed; reachability does not change it.
        response.schema.result = true;
        response.schema.data = schema_columns();
        response
    }

    async fn test_connection_ng(&self, source: &Source) -> ConnectionTestNgResponse {
        let mut response = ConnectionTestNgResponse::default();
        let discovery = match self.discovery(source, &RequestScope::default()) {
            Ok(discovery) => discovery,
            Err(err) => {
                response.error = Some(err.to_string());
                return response;
            }
        };

        response.total_contexts = Some(discovery.bundle().contexts().len());
        let allowed = discovery.allowed_contexts().await.to_vec();
        if allowed.is_empty() {
            response.matched_contexts = Some(allowed);
            response.error = Some("No contexts matched the filter expression".to_string());
            return response;
        }
        response.matched_contexts = Some(allowed);

        match self.probe(&discovery).await {
            Ok(()) => response.result = true,
            Err(err) => response.error = Some(err.to_string()),
        }
        response
    }

    async fn get_schema(&self, _source: &Source) -> anyhow::Result<Vec<SourceColumn>> {
        Ok(schema_columns())
    }

    async fn autocomplete(
        &self,
        _request: &AutocompleteRequest,
    ) -> anyhow::Result<AutocompleteResponse> {
        // Log columns have no value index to complete from.
        Ok(AutocompleteResponse::default())
    }

    async fn fetch_data(
        &self,
        request: &DataRequest,
        tz: FixedOffset,
    ) -> Result<DataResponse, EngineError> {
        let filter = parse_optional(self.engine.query_language.as_ref(), &request.query)
            .map_err(|err| EngineError::parse(err.message))?;

        match self
            .gather(
                &request.source,
                &request.scope,
                request.time_from,
                request.time_to,
            )
            .await?
        {
            Gathered::Empty(reason) => Ok(DataResponse::with_error(reason)),
            Gathered::Logs {
                entries,
                log_errors,
            } => {
                let mut rows = Self::rows_from_entries(entries, filter.as_ref(), tz);
                rows.sort_by(|a, b| b.time().unixtime.cmp(&a.time().unixtime));
                let total = rows.len();
                rows.truncate(request.limit);

                let message = (total > request.limit).then(|| {
                    format!(
                        "Displaying limited results: Only {} out of {} matching entries are shown.",
                        request.limit, total
                    )
                });
                Ok(DataResponse {
                    error: empty_with_partition_errors(&rows, &log_errors),
                    rows,
                    message,
                })
            }
        }
    }

    async fn fetch_graph_data(
        &self,
        request: &GraphDataRequest,
    ) -> Result<GraphDataResponse, EngineError> {
        let filter = parse_optional(self.engine.query_language.as_ref(), &request.query)
            .map_err(|err| EngineError::parse(err.message))?;

        match self
            .gather(
                &request.source,
                &request.scope,
                request.time_from,
                request.time_to,
            )
            .await?
        {
            Gathered::Empty(reason) => Ok(GraphDataResponse::with_error(reason)),
            Gathered::Logs { entries, .. } => {
                let tz = FixedOffset::east_opt(0).expect("utc offset");
                let rows = Self::rows_from_entries(entries, filter.as_ref(), tz);
                let graph = graph_from_rows(
                    &rows,
                    request.time_from,
                    request.time_to,
                    request.group_by_column(),
                );
                Ok(graph.into())
            }
        }
    }

    async fn fetch_data_and_graph(
        &self,
        request: &GraphDataRequest,
        tz: FixedOffset,
    ) -> Result<DataAndGraphResponse, EngineError> {
        let filter = parse_optional(self.engine.query_language.as_ref(), &request.query)
            .map_err(|err| EngineError::parse(err.message))?;

        // One discovery/log pass feeds both views; fetching twice would
        // double cluster load and let the row and graph views drift apart.
        match self
            .gather(
                &request.source,
                &request.scope,
                request.time_from,
                request.time_to,
            )
            .await?
        {
            Gathered::Empty(reason) => Ok(DataAndGraphResponse::with_error(reason)),
            Gathered::Logs {
                entries,
                log_errors,
            } => {
                let mut rows = Self::rows_from_entries(entries, filter.as_ref(), tz);
                let graph = graph_from_rows(
                    &rows,
                    request.time_from,
                    request.time_to,
                    request.group_by_column(),
                );

                rows.sort_by(|a, b| b.time().unixtime.cmp(&a.time().unixtime));
                let total = rows.len();
                rows.truncate(request.limit);
                let message = (total > request.limit).then(|| {
                    format!(
                        "Displaying limited results: Only {} out of {} matching entries are shown.",
                        request.limit, total
                    )
                });

                Ok(DataAndGraphResponse {
                    error: empty_with_partition_errors(&rows, &log_errors),
                    rows,
                    graph: graph.into(),
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::client::ClusterError;
    use crate::fetch::kubernetes::logs::parse_log_timestamp;
    use crate::model::request::RequestScope;
    use crate::testing::{
        kubeconfig_yaml, kubernetes_source, namespace_record, pod_record, scripted_logs,
        test_engine, StubClusterApi, StubClusterFactory,
    };

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn window_ms() -> (i64, i64) {
        let from = parse_log_timestamp("2026-02-11T06:00:00Z")
            .unwrap()
            .timestamp_millis();
        let to = parse_log_timestamp("2026-02-11T07:00:00Z")
            .unwrap()
            .timestamp_millis();
        (from, to)
    }

    fn scripted_cluster() -> StubClusterApi {
        StubClusterApi::default()
            .with_namespaces(vec![namespace_record("payments")])
            .with_pods(
                "payments",
                vec![
                    pod_record("api-0", &["app"], "Running", "node-1"),
                    pod_record("worker-0", &["app"], "Running", "node-2"),
                ],
            )
            .with_logs(
                "payments/api-0/app",
                scripted_logs(
                    Ok(concat!(
                        "2026-02-11T06:10:00Z request handled\n",
                        "2026-02-11T06:20:00Z request failed\n",
                    )
                    .to_string()),
                    Ok(String::new()),
                ),
            )
            .with_logs(
                "payments/worker-0/app",
                scripted_logs(
                    Ok("2026-02-11T06:15:00Z job done\n".to_string()),
                    Ok(String::new()),
                ),
            )
    }

    fn request(source: Source, limit: usize) -> DataRequest {
        let (time_from, time_to) = window_ms();
        DataRequest {
            source,
            query: String::new(),
            raw_query: String::new(),
            time_from,
            time_to,
            limit,
            scope: RequestScope::default(),
        }
    }

    #[tokio::test]
    async fn fetch_data_returns_rows_sorted_descending() {
        let yaml = kubeconfig_yaml(&["prod-a"], Some("prod-a"));
        let factory = StubClusterFactory::default().with_api("prod-a", scripted_cluster());
        let engine = test_engine(factory);
        let fetcher = KubernetesFetcher::new(engine);

        let response = fetcher
            .fetch_data(&request(kubernetes_source(&yaml, ""), 100), utc())
            .await
            .unwrap();

        assert!(response.error.is_none());
        assert_eq!(response.rows.len(), 3);
        let times: Vec<i64> = response.rows.iter().map(|r| r.time().unixtime).collect();
        assert!(times.windows(2).all(|w| w[0] >= w[1]));

        let record = response.rows[0].record();
        assert_eq!(record["context"], "prod-a");
        assert_eq!(record["namespace"], "payments");
        assert_eq!(record["message"], "request failed");
    }

    #[tokio::test]
    async fn fetch_data_applies_the_query_filter_and_limit() {
        let yaml = kubeconfig_yaml(&["prod-a"], Some("prod-a"));
        let factory = StubClusterFactory::default().with_api("prod-a", scripted_cluster());
        let engine = test_engine(factory);
        let fetcher = KubernetesFetcher::new(engine);

        let mut req = request(kubernetes_source(&yaml, ""), 100);
        req.query = "pod=\"api*\"".to_string();
        let response = fetcher.fetch_data(&req, utc()).await.unwrap();
        assert_eq!(response.rows.len(), 2);
        assert!(response.message.is_none());

        let mut req = request(kubernetes_source(&yaml, ""), 1);
        req.query = "pod=\"api*\"".to_string();
        let response = fetcher.fetch_data(&req, utc()).await.unwrap();
        assert_eq!(response.rows.len(), 1);
        let message = response.message.unwrap();
        assert!(message.contains("Only 1 out of 2"));
    }

    #[tokio::test]
    async fn malformed_query_fails_before_any_fetch() {
        let yaml = kubeconfig_yaml(&["prod-a"], Some("prod-a"));
        let api = Arc::new(scripted_cluster());
        let factory = StubClusterFactory::default().with_shared_api("prod-a", api.clone());
        let engine = test_engine(factory);
        let fetcher = KubernetesFetcher::new(engine);

        let mut req = request(kubernetes_source(&yaml, ""), 100);
        req.query = "no-equals-sign".to_string();
        let err = fetcher.fetch_data(&req, utc()).await.unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
        assert_eq!(api.namespace_calls(), 0);
        assert_eq!(api.log_calls(), 0);
    }

    #[tokio::test]
    async fn empty_pod_set_is_a_soft_error() {
        let yaml = kubeconfig_yaml(&["prod-a"], Some("prod-a"));
        let api = StubClusterApi::default().with_namespaces(vec![namespace_record("payments")]);
        let factory = StubClusterFactory::default().with_api("prod-a", api);
        let engine = test_engine(factory);
        let fetcher = KubernetesFetcher::new(engine);

        let response = fetcher
            .fetch_data(&request(kubernetes_source(&yaml, ""), 100), utc())
            .await
            .unwrap();
        assert!(response.rows.is_empty());
        assert_eq!(
            response.error.as_deref(),
            Some("No pods found matching the filters")
        );
    }

    #[tokio::test]
    async fn namespace_fetch_failure_reports_diagnostics() {
        let yaml = kubeconfig_yaml(&["prod-a"], Some("prod-a"));
        let api = StubClusterApi::default().failing_namespaces("connection refused");
        let factory = StubClusterFactory::default().with_api("prod-a", api);
        let engine = test_engine(factory);
        let fetcher = KubernetesFetcher::new(engine);

        let response = fetcher
            .fetch_data(&request(kubernetes_source(&yaml, ""), 100), utc())
            .await
            .unwrap();
        assert!(response.rows.is_empty());
        let error = response.error.unwrap();
        assert!(error.starts_with("Failed to fetch namespaces:"));
        assert!(error.contains("connection refused"));
    }

    #[tokio::test]
    async fn data_and_graph_share_one_log_pass() {
        let yaml = kubeconfig_yaml(&["prod-a"], Some("prod-a"));
        let api = Arc::new(scripted_cluster());
        let factory = StubClusterFactory::default().with_shared_api("prod-a", api.clone());
        let engine = test_engine(factory);
        let fetcher = KubernetesFetcher::new(engine);

        let (time_from, time_to) = window_ms();
        let req = GraphDataRequest {
            source: kubernetes_source(&yaml, ""),
            query: String::new(),
            raw_query: String::new(),
            time_from,
            time_to,
            limit: 2,
            group_by: vec!["labels.app".to_string()],
            scope: RequestScope::default(),
        };
        let response = fetcher.fetch_data_and_graph(&req, utc()).await.unwrap();

        // Two pods, one container each: exactly one log read per container.
        assert_eq!(api.log_calls(), 2);
        assert_eq!(response.rows.len(), 2);
        assert_eq!(response.graph.total, 3);
        assert_eq!(response.graph.data["api"].iter().sum::<u64>(), 2);
        assert_eq!(response.graph.data["worker"].iter().sum::<u64>(), 1);
        assert!(response.graph.timestamps.contains(&time_from));
        assert!(response.graph.timestamps.contains(&time_to));
    }

    #[tokio::test]
    async fn terminated_container_logs_appear_with_attribution() {
        let yaml = kubeconfig_yaml(&["prod-a"], Some("prod-a"));
        let api = StubClusterApi::default()
            .with_namespaces(vec![namespace_record("jobs")])
            .with_pods("jobs", vec![pod_record("batch-0", &["runner"], "Failed", "node-3")])
            .with_logs(
                "jobs/batch-0/runner",
                scripted_logs(
                    Err(ClusterError::Api {
                        code: 400,
                        message: "container \"runner\" in pod \"batch-0\" is terminated".into(),
                    }),
                    Ok("2026-02-11T06:30:00Z final state\n".to_string()),
                ),
            );
        let factory = StubClusterFactory::default().with_api("prod-a", api);
        let engine = test_engine(factory);
        let fetcher = KubernetesFetcher::new(engine);

        let response = fetcher
            .fetch_data(&request(kubernetes_source(&yaml, ""), 100), utc())
            .await
            .unwrap();
        assert_eq!(response.rows.len(), 1);
        let record = response.rows[0].record();
        assert_eq!(record["container"], "runner");
        assert_eq!(record["pod"], "batch-0");
        assert_eq!(record["message"], "final state");
    }

    #[tokio::test]
    async fn test_connection_reports_reachability_and_fixed_schema() {
        let yaml = kubeconfig_yaml(&["prod-a"], Some("prod-a"));
        let factory = StubClusterFactory::default().with_api("prod-a", scripted_cluster());
        let engine = test_engine(factory);
        let fetcher = KubernetesFetcher::new(engine);

        let report = fetcher.test_connection(&kubernetes_source(&yaml, "")).await;
        assert!(report.reachability.result);
        assert!(report.schema.result);
        assert_eq!(report.schema.data.len(), 10);

        let failing = StubClusterFactory::default().failing_context("prod-a", "dial timeout");
        let engine = test_engine(failing);
        let fetcher = KubernetesFetcher::new(engine);
        let report = fetcher.test_connection(&kubernetes_source(&yaml, "")).await;
        assert!(!report.reachability.result);
        assert!(report.reachability.error.unwrap().contains("dial timeout"));
    }

    #[tokio::test]
    async fn test_connection_ng_reports_context_counts() {
        let yaml = kubeconfig_yaml(&["dev", "prod-a"], None);
        let factory = StubClusterFactory::default().with_api("prod-a", scripted_cluster());
        let engine = test_engine(factory);
        let fetcher = KubernetesFetcher::new(engine);

        let report = fetcher
            .test_connection_ng(&kubernetes_source(&yaml, "name=\"prod*\""))
            .await;
        assert!(report.result);
        assert_eq!(report.total_contexts, Some(2));
        assert_eq!(report.matched_contexts.unwrap().len(), 1);

        let factory = StubClusterFactory::default();
        let engine = test_engine(factory);
        let fetcher = KubernetesFetcher::new(engine);
        let report = fetcher
            .test_connection_ng(&kubernetes_source(&yaml, "name=\"absent*\""))
            .await;
        assert!(!report.result);
        assert_eq!(
            report.error.as_deref(),
            Some("No contexts matched the filter expression")
        );
    }

    #[tokio::test]
    async fn pods_preview_lists_the_selected_topology() {
        let yaml = kubeconfig_yaml(&["prod-a"], Some("prod-a"));
        let factory = StubClusterFactory::default().with_api("prod-a", scripted_cluster());
        let engine = test_engine(factory);
        let fetcher = KubernetesFetcher::new(engine);

        let preview = fetcher
            .pods_preview(&kubernetes_source(&yaml, ""), &RequestScope::default())
            .await
            .unwrap();
        assert_eq!(preview.len(), 2);
        assert_eq!(preview[0].pod_name, "api-0");
        assert_eq!(preview[0].containers, vec!["app"]);
        assert_eq!(preview[1].pod_name, "worker-0");
    }
}
