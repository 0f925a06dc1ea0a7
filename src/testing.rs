//! Shared stub collaborators for unit tests: a tiny glob-capable query
//! language, scripted cluster APIs with call counters, and a scripted
//! database client.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::config::Settings;
use crate::core::client::clickhouse_http::{
    DatabaseClient, DatabaseClientFactory, QueryOutput,
};
use crate::core::client::kube_config::KubeConfigBundle;
use crate::core::client::pool::ClusterClientFactory;
use crate::core::client::{
    ClusterApi, ClusterError, DeploymentRecord, LogQuery, NamespaceRecord, PodDetail, PodRecord,
    Selectors,
};
use crate::engine::FetchEngine;
use crate::model::source::{
    ClickhouseConnection, ClickhouseSourceOptions, Connection, KubernetesConnection, Source,
    SourceColumn, SourceKind,
};
use crate::query::{
    record_path, CompileError, ParseError, ParsedQuery, QueryLanguage, Record,
};

/// `field="value"` (equality) or `field="prefix*"` (glob prefix) matcher.
pub struct StubQuery {
    field: String,
    pattern: String,
}

impl ParsedQuery for StubQuery {
    fn matches(&self, record: &Record) -> bool {
        let value = match record_path(record, &self.field) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return false,
        };
        match self.pattern.strip_suffix('*') {
            Some(prefix) => value.starts_with(prefix),
            None => value == self.pattern,
        }
    }

    fn to_sql(
        &self,
        columns: &BTreeMap<String, SourceColumn>,
    ) -> Result<String, CompileError> {
        let root = self.field.split('.').next().unwrap_or(&self.field);
        if !columns.contains_key(root) {
            return Err(CompileError::new(format!("unknown field: {}", self.field)));
        }
        Ok(format!(
            "{} = '{}'",
            self.field,
            self.pattern.replace('\'', "\\'")
        ))
    }
}

pub struct StubLanguage;

impl QueryLanguage for StubLanguage {
    fn parse(&self, text: &str) -> Result<Arc<dyn ParsedQuery>, ParseError> {
        let (field, pattern) = text
            .split_once('=')
            .ok_or_else(|| ParseError::new(format!("expected field=value, got: {}", text)))?;
        Ok(Arc::new(StubQuery {
            field: field.trim().to_string(),
            pattern: pattern.trim().trim_matches('"').to_string(),
        }))
    }
}

#[derive(Clone)]
pub struct ScriptedLogs {
    pub primary: Result<String, ClusterError>,
    pub previous: Result<String, ClusterError>,
}

pub fn scripted_logs(
    primary: Result<String, ClusterError>,
    previous: Result<String, ClusterError>,
) -> ScriptedLogs {
    ScriptedLogs { primary, previous }
}

#[derive(Default)]
pub struct StubClusterApi {
    namespaces: Vec<NamespaceRecord>,
    pods: HashMap<String, Vec<PodRecord>>,
    logs: HashMap<String, ScriptedLogs>,
    deployments: HashMap<String, Vec<DeploymentRecord>>,
    fail_namespaces: Option<String>,
    namespace_calls: AtomicUsize,
    pod_calls: AtomicUsize,
    log_calls: AtomicUsize,
}

impl StubClusterApi {
    pub fn with_namespaces(mut self, namespaces: Vec<NamespaceRecord>) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_pods(mut self, namespace: &str, pods: Vec<PodRecord>) -> Self {
        self.pods.insert(namespace.to_string(), pods);
        self
    }

    /// Key is `namespace/pod/container`.
    pub fn with_logs(mut self, key: &str, logs: ScriptedLogs) -> Self {
        self.logs.insert(key.to_string(), logs);
        self
    }

    pub fn with_deployments(mut self, namespace: &str, found: Vec<DeploymentRecord>) -> Self {
        self.deployments.insert(namespace.to_string(), found);
        self
    }

    pub fn failing_namespaces(mut self, message: &str) -> Self {
        self.fail_namespaces = Some(message.to_string());
        self
    }

    pub fn namespace_calls(&self) -> usize {
        self.namespace_calls.load(Ordering::SeqCst)
    }

    pub fn pod_calls(&self) -> usize {
        self.pod_calls.load(Ordering::SeqCst)
    }

    pub fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterApi for StubClusterApi {
    async fn list_namespaces(
        &self,
        _selectors: &Selectors,
    ) -> Result<Vec<NamespaceRecord>, ClusterError> {
        self.namespace_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_namespaces {
            return Err(ClusterError::Transport(message.clone()));
        }
        Ok(self.namespaces.clone())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        _selectors: &Selectors,
    ) -> Result<Vec<PodRecord>, ClusterError> {
        self.pod_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pods.get(namespace).cloned().unwrap_or_default())
    }

    async fn read_container_logs(&self, query: &LogQuery) -> Result<String, ClusterError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}/{}/{}", query.namespace, query.pod, query.container);
        match self.logs.get(&key) {
            Some(scripted) if query.previous => scripted.previous.clone(),
            Some(scripted) => scripted.primary.clone(),
            None => Ok(String::new()),
        }
    }

    async fn list_deployments(
        &self,
        namespace: &str,
    ) -> Result<Vec<DeploymentRecord>, ClusterError> {
        Ok(self.deployments.get(namespace).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct StubClusterFactory {
    apis: HashMap<String, Arc<StubClusterApi>>,
    fail_contexts: HashMap<String, String>,
    builds: AtomicUsize,
}

impl StubClusterFactory {
    pub fn with_api(mut self, context: &str, api: StubClusterApi) -> Self {
        self.apis.insert(context.to_string(), Arc::new(api));
        self
    }

    pub fn with_shared_api(mut self, context: &str, api: Arc<StubClusterApi>) -> Self {
        self.apis.insert(context.to_string(), api);
        self
    }

    pub fn failing_context(mut self, context: &str, message: &str) -> Self {
        self.fail_contexts
            .insert(context.to_string(), message.to_string());
        self
    }
}

#[async_trait]
impl ClusterClientFactory for StubClusterFactory {
    async fn build(
        &self,
        _bundle: &KubeConfigBundle,
        context: &str,
    ) -> anyhow::Result<Arc<dyn ClusterApi>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_contexts.get(context) {
            anyhow::bail!("{}", message);
        }
        match self.apis.get(context) {
            Some(api) => Ok(api.clone() as Arc<dyn ClusterApi>),
            None => Ok(Arc::new(StubClusterApi::default()) as Arc<dyn ClusterApi>),
        }
    }
}

#[derive(Default)]
pub struct StubDatabaseClient {
    responses: Mutex<Vec<(String, QueryOutput)>>,
    queries: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl StubDatabaseClient {
    /// Respond with `output` to any query containing `needle`; first match
    /// wins.
    pub fn push_response(&self, needle: &str, output: QueryOutput) {
        self.responses.lock().push((needle.to_string(), output));
    }

    pub fn recorded_queries(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl DatabaseClient for StubDatabaseClient {
    async fn execute(
        &self,
        query: &str,
        params: &[(String, String)],
    ) -> anyhow::Result<QueryOutput> {
        self.queries
            .lock()
            .push((query.to_string(), params.to_vec()));
        let responses = self.responses.lock();
        for (needle, output) in responses.iter() {
            if query.contains(needle.as_str()) {
                return Ok(output.clone());
            }
        }
        Ok(QueryOutput::default())
    }
}

#[derive(Default)]
pub struct StubDatabaseFactory {
    pub client: Arc<StubDatabaseClient>,
}

impl DatabaseClientFactory for StubDatabaseFactory {
    fn build(&self, _conn: &ClickhouseConnection) -> anyhow::Result<Arc<dyn DatabaseClient>> {
        Ok(self.client.clone() as Arc<dyn DatabaseClient>)
    }
}

pub fn namespace_record(name: &str) -> NamespaceRecord {
    NamespaceRecord {
        name: name.to_string(),
        record: json!({
            "name": name,
            "metadata": { "name": name },
            "status": { "phase": "Active" },
        }),
    }
}

pub fn pod_record(name: &str, containers: &[&str], phase: &str, node: &str) -> PodRecord {
    let app = name.split('-').next().unwrap_or(name).to_string();
    let labels: BTreeMap<String, String> = BTreeMap::from([("app".to_string(), app.clone())]);
    PodRecord {
        name: name.to_string(),
        containers: containers.iter().map(|c| c.to_string()).collect(),
        phase: phase.to_string(),
        node: node.to_string(),
        labels: labels.clone(),
        annotations: BTreeMap::new(),
        record: json!({
            "name": name,
            "metadata": { "name": name, "labels": { "app": app } },
            "status": { "phase": phase },
            "spec": { "nodeName": node },
        }),
    }
}

pub fn pod_detail(containers: &[&str], status: &str, node: &str) -> PodDetail {
    PodDetail {
        containers: containers.iter().map(|c| c.to_string()).collect(),
        status: status.to_string(),
        node: node.to_string(),
        labels: BTreeMap::new(),
        annotations: BTreeMap::new(),
    }
}

pub fn kubeconfig_yaml(contexts: &[&str], current: Option<&str>) -> String {
    let mut yaml = String::from("apiVersion: v1\nkind: Config\n");
    if let Some(current) = current {
        yaml.push_str(&format!("current-context: {}\n", current));
    }
    yaml.push_str("clusters:\n");
    for name in contexts {
        yaml.push_str(&format!(
            "- name: {}\n  cluster:\n    server: https://{}.example.com:6443\n",
            name, name
        ));
    }
    yaml.push_str("contexts:\n");
    for name in contexts {
        yaml.push_str(&format!(
            "- name: {}\n  context:\n    cluster: {}\n    user: admin\n",
            name, name
        ));
    }
    yaml.push_str("users:\n- name: admin\n  user:\n    token: secret\n");
    yaml
}

pub fn test_settings() -> Settings {
    Settings::default()
}

pub fn test_engine(factory: StubClusterFactory) -> Arc<FetchEngine> {
    FetchEngine::with_collaborators(
        Arc::new(StubLanguage),
        test_settings(),
        Arc::new(factory),
        Arc::new(StubDatabaseFactory::default()),
    )
}

pub fn test_engine_with_db(client: Arc<StubDatabaseClient>) -> Arc<FetchEngine> {
    FetchEngine::with_collaborators(
        Arc::new(StubLanguage),
        test_settings(),
        Arc::new(StubClusterFactory::default()),
        Arc::new(StubDatabaseFactory { client }),
    )
}

pub fn kubernetes_source(kubeconfig: &str, context_filter: &str) -> Source {
    let columns: BTreeMap<String, SourceColumn> = crate::fetch::kubernetes::schema_columns()
        .into_iter()
        .map(|column| (column.name.clone(), column))
        .collect();
    Source {
        id: 7,
        name: "pod-logs".to_string(),
        kind: SourceKind::Kubernetes,
        connection_id: 3,
        connection: Connection::Kubernetes(KubernetesConnection {
            kubeconfig: kubeconfig.to_string(),
            kubeconfig_is_local: false,
            context_filter: context_filter.to_string(),
            max_concurrent_requests: 4,
        }),
        columns,
        time_column: "time".to_string(),
        date_column: None,
        kubernetes: Default::default(),
        clickhouse: Default::default(),
    }
}

pub fn clickhouse_source() -> Source {
    let mut columns = BTreeMap::new();
    for column in [
        SourceColumn::new("time", "DateTime64(3)"),
        SourceColumn::new("date", "Date"),
        SourceColumn::new("level", "LowCardinality(String)"),
        SourceColumn::new("message", "String"),
        SourceColumn::new("payload", "String").as_jsonstring(),
        SourceColumn::new("tags", "Map(String, String)"),
    ] {
        columns.insert(column.name.clone(), column);
    }
    Source {
        id: 11,
        name: "app-logs".to_string(),
        kind: SourceKind::Clickhouse,
        connection_id: 5,
        connection: Connection::Clickhouse(ClickhouseConnection {
            host: "ch.example.com".to_string(),
            port: 8443,
            user: "reader".to_string(),
            password: "secret".to_string(),
            ssl: true,
            verify: true,
            ..Default::default()
        }),
        columns,
        time_column: "time".to_string(),
        date_column: Some("date".to_string()),
        kubernetes: Default::default(),
        clickhouse: ClickhouseSourceOptions {
            database: "logs".to_string(),
            table: "app".to_string(),
            settings: String::new(),
        },
    }
}
