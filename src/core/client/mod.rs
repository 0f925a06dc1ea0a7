//! Clients for the external backends. The engine only ever talks to the
//! trait seams declared here; the kube-rs and ClickHouse HTTP adapters are
//! the production implementations.

pub mod clickhouse_http;
pub mod kube_api;
pub mod kube_config;
pub mod pool;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use http::StatusCode;
use thiserror::Error;

use crate::query::Record;

/// Failure of one cluster API call. Partition isolation happens above this
/// level; the adapter just reports what the API said.
#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    #[error("cluster api error (status {code}): {message}")]
    Api { code: u16, message: String },

    #[error("cluster transport error: {0}")]
    Transport(String),
}

impl ClusterError {
    /// The condition that triggers the previous-container log fallback.
    pub fn is_terminated_container(&self) -> bool {
        matches!(
            self,
            ClusterError::Api { code, message }
                if *code == StatusCode::BAD_REQUEST.as_u16()
                    && message.to_ascii_lowercase().contains("terminated")
        )
    }
}

/// Label and field selector strings in the API server's own syntax. Empty
/// strings mean unfiltered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selectors {
    pub labels: String,
    pub fields: String,
}

#[derive(Debug, Clone)]
pub struct NamespaceRecord {
    pub name: String,
    /// Full structured object for query-language evaluation.
    pub record: Record,
}

#[derive(Debug, Clone)]
pub struct PodRecord {
    pub name: String,
    pub containers: Vec<String>,
    pub phase: String,
    pub node: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub record: Record,
}

/// What discovery retains of a pod once filtering is done; the cached
/// topology is built from these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodDetail {
    pub containers: Vec<String>,
    pub status: String,
    pub node: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl From<&PodRecord> for PodDetail {
    fn from(pod: &PodRecord) -> PodDetail {
        PodDetail {
            containers: pod.containers.clone(),
            status: pod.phase.clone(),
            node: pod.node.clone(),
            labels: pod.labels.clone(),
            annotations: pod.annotations.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentRecord {
    pub name: String,
    pub namespace: String,
    pub replicas_desired: i32,
    pub replicas_ready: i32,
    pub status: String,
    pub labels: BTreeMap<String, String>,
}

/// One container-log read.
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    /// Only lines newer than this many seconds; 0 disables the bound.
    pub since_seconds: i64,
    /// Only the last N lines; 0 disables the bound.
    pub tail_lines: i64,
    /// Read the previous (pre-restart) container's logs instead.
    pub previous: bool,
    /// Ask the API server to prefix each line with its timestamp.
    pub timestamps: bool,
}

/// Namespace names per context, as resolved by discovery.
pub type NamespaceMap = HashMap<String, Vec<String>>;

/// context -> namespace -> pod name -> detail.
pub type PodTopology = HashMap<String, HashMap<String, HashMap<String, PodDetail>>>;

/// The cluster API surface the engine consumes. Every call is a potentially
/// failing network operation isolated per partition by the callers.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_namespaces(
        &self,
        selectors: &Selectors,
    ) -> Result<Vec<NamespaceRecord>, ClusterError>;

    async fn list_pods(
        &self,
        namespace: &str,
        selectors: &Selectors,
    ) -> Result<Vec<PodRecord>, ClusterError>;

    async fn read_container_logs(&self, query: &LogQuery) -> Result<String, ClusterError>;

    async fn list_deployments(
        &self,
        namespace: &str,
    ) -> Result<Vec<DeploymentRecord>, ClusterError>;
}
