use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, ListParams, LogParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use serde_json::Value;
use tracing::debug;

use crate::core::client::kube_config::KubeConfigBundle;
use crate::core::client::{
    ClusterApi, ClusterError, DeploymentRecord, LogQuery, NamespaceRecord, PodRecord, Selectors,
};

#[derive(Debug, Clone, Copy)]
pub struct ClientTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

/// kube-rs backed implementation of [`ClusterApi`] for one context of one
/// credential bundle.
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Build a client for the named context. The kubeconfig is loaded from
    /// memory; no credential material touches the filesystem.
    pub async fn connect(
        bundle: &KubeConfigBundle,
        context: &str,
        timeouts: ClientTimeouts,
    ) -> anyhow::Result<KubeClusterApi> {
        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            cluster: None,
            user: None,
        };
        let mut config =
            Config::from_custom_kubeconfig(bundle.kubeconfig().clone(), &options).await?;
        config.connect_timeout = Some(timeouts.connect);
        config.read_timeout = Some(timeouts.read);

        let client = Client::try_from(config)?;
        debug!("kubernetes client initialized for context {}", context);
        Ok(KubeClusterApi { client })
    }
}

fn map_err(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) => ClusterError::Api {
            code: resp.code,
            message: resp.message,
        },
        other => ClusterError::Transport(other.to_string()),
    }
}

fn list_params(selectors: &Selectors) -> ListParams {
    let mut params = ListParams::default();
    if !selectors.labels.is_empty() {
        params = params.labels(&selectors.labels);
    }
    if !selectors.fields.is_empty() {
        params = params.fields(&selectors.fields);
    }
    params
}

/// Derive a deployment's display status from its conditions. Available wins
/// outright; Progressing and ReplicaFailure keep scanning so a later
/// Available can still take precedence.
fn deployment_status(deployment: &Deployment) -> String {
    let mut status = "Unknown".to_string();
    if let Some(conditions) = deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
    {
        for condition in conditions {
            if condition.status != "True" {
                continue;
            }
            match condition.type_.as_str() {
                "Available" => {
                    status = "Available".to_string();
                    break;
                }
                "Progressing" => status = "Progressing".to_string(),
                "ReplicaFailure" => status = "Failed".to_string(),
                _ => {}
            }
        }
    }
    status
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_namespaces(
        &self,
        selectors: &Selectors,
    ) -> Result<Vec<NamespaceRecord>, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&list_params(selectors)).await.map_err(map_err)?;
        debug!("discovered {} namespace(s)", list.items.len());

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| {
                let name = ns.metadata.name.clone()?;
                let record = serde_json::to_value(&ns).unwrap_or(Value::Null);
                Some(NamespaceRecord { name, record })
            })
            .collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selectors: &Selectors,
    ) -> Result<Vec<PodRecord>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&list_params(selectors)).await.map_err(map_err)?;
        debug!(
            "discovered {} pod(s) in namespace '{}'",
            list.items.len(),
            namespace
        );

        Ok(list
            .items
            .into_iter()
            .filter_map(|pod| {
                let name = pod.metadata.name.clone()?;
                let containers = pod
                    .spec
                    .as_ref()
                    .map(|spec| spec.containers.iter().map(|c| c.name.clone()).collect())
                    .unwrap_or_default();
                let phase = pod
                    .status
                    .as_ref()
                    .and_then(|status| status.phase.clone())
                    .unwrap_or_default();
                let node = pod
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.node_name.clone())
                    .unwrap_or_default();
                let labels = pod.metadata.labels.clone().unwrap_or_default();
                let annotations = pod.metadata.annotations.clone().unwrap_or_default();
                let record = serde_json::to_value(&pod).unwrap_or(Value::Null);
                Some(PodRecord {
                    name,
                    containers,
                    phase,
                    node,
                    labels,
                    annotations,
                    record,
                })
            })
            .collect())
    }

    async fn read_container_logs(&self, query: &LogQuery) -> Result<String, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &query.namespace);
        let mut params = LogParams {
            container: Some(query.container.clone()),
            previous: query.previous,
            timestamps: query.timestamps,
            ..LogParams::default()
        };
        if query.since_seconds > 0 {
            params.since_seconds = Some(query.since_seconds);
        }
        if query.tail_lines > 0 {
            params.tail_lines = Some(query.tail_lines);
        }
        api.logs(&query.pod, &params).await.map_err(map_err)
    }

    async fn list_deployments(
        &self,
        namespace: &str,
    ) -> Result<Vec<DeploymentRecord>, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await.map_err(map_err)?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|deployment| {
                let name = deployment.metadata.name.clone()?;
                let replicas_desired = deployment
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.replicas)
                    .unwrap_or(0);
                let replicas_ready = deployment
                    .status
                    .as_ref()
                    .and_then(|status| status.ready_replicas)
                    .unwrap_or(0);
                let status = deployment_status(&deployment);
                let labels = deployment.metadata.labels.clone().unwrap_or_default();
                Some(DeploymentRecord {
                    name,
                    namespace: namespace.to_string(),
                    replicas_desired,
                    replicas_ready,
                    status,
                    labels,
                })
            })
            .collect())
    }
}
