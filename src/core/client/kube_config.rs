use std::path::PathBuf;

use kube::config::Kubeconfig;
use serde::Serialize;
use serde_json::json;

use crate::core::cache::content_hash;
use crate::errors::EngineError;
use crate::model::source::KubernetesConnection;
use crate::query::Record;

/// One named cluster endpoint declared in a kubeconfig. Discovered, never
/// mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterContext {
    pub name: String,
    pub cluster: String,
    pub user: String,
    pub namespace: String,
}

impl ClusterContext {
    /// Structured record handed to the context filter expression.
    pub fn record(&self) -> Record {
        json!({
            "name": self.name,
            "cluster": self.cluster,
            "user": self.user,
            "namespace": self.namespace,
        })
    }
}

/// A parsed kubeconfig plus the content hash that partitions every cache
/// keyed by this credential bundle. Two connections with identical content
/// share cached topology and clients; any edit produces a new hash.
#[derive(Debug, Clone)]
pub struct KubeConfigBundle {
    config: Kubeconfig,
    pub content_hash: String,
    pub current_context: Option<String>,
}

impl KubeConfigBundle {
    /// Load from an inline blob or, when the connection says so, a local
    /// path (with `~` expansion). All failures here are configuration
    /// errors: nothing has fanned out yet.
    pub fn load(conn: &KubernetesConnection) -> Result<KubeConfigBundle, EngineError> {
        let raw = if conn.kubeconfig_is_local {
            let path = expand_home(&conn.kubeconfig);
            std::fs::read_to_string(&path).map_err(|err| {
                EngineError::configuration(format!(
                    "kubeconfig file not found: {}: {}",
                    path.display(),
                    err
                ))
            })?
        } else {
            conn.kubeconfig.clone()
        };

        let config: Kubeconfig = serde_yaml::from_str(&raw)
            .map_err(|err| EngineError::configuration(format!("invalid kubeconfig: {}", err)))?;

        let current_context = config.current_context.clone().filter(|s| !s.is_empty());
        Ok(KubeConfigBundle {
            content_hash: content_hash(&raw),
            current_context,
            config,
        })
    }

    /// Contexts in declaration order.
    pub fn contexts(&self) -> Vec<ClusterContext> {
        self.config
            .contexts
            .iter()
            .map(|named| ClusterContext {
                name: named.name.clone(),
                cluster: named
                    .context
                    .as_ref()
                    .map(|ctx| ctx.cluster.clone())
                    .unwrap_or_default(),
                user: named
                    .context
                    .as_ref()
                    .and_then(|ctx| ctx.user.clone())
                    .unwrap_or_default(),
                namespace: named
                    .context
                    .as_ref()
                    .and_then(|ctx| ctx.namespace.clone())
                    .unwrap_or_else(|| "default".to_string()),
            })
            .collect()
    }

    pub fn kubeconfig(&self) -> &Kubeconfig {
        &self.config
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
