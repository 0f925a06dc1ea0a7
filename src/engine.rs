use std::sync::Arc;

use crate::config::Settings;
use crate::core::cache::TtlCache;
use crate::core::client::clickhouse_http::{ClickhouseHttpFactory, DatabaseClientFactory};
use crate::core::client::kube_api::ClientTimeouts;
use crate::core::client::kube_config::ClusterContext;
use crate::core::client::pool::{ClientPool, ClusterClientFactory, KubeClientFactory};
use crate::core::client::{NamespaceMap, PodTopology};
use crate::fetch::clickhouse::ClickhouseFetcher;
use crate::fetch::kubernetes::KubernetesFetcher;
use crate::fetch::SourceFetcher;
use crate::model::source::SourceKind;
use crate::query::QueryLanguage;

/// Shared TTL caches for discovered cluster topology, one per stage.
pub struct TopologyCaches {
    pub contexts: TtlCache<Vec<ClusterContext>>,
    pub namespaces: TtlCache<NamespaceMap>,
    pub pods: TtlCache<PodTopology>,
}

impl TopologyCaches {
    pub fn new() -> TopologyCaches {
        TopologyCaches {
            contexts: TtlCache::new(),
            namespaces: TtlCache::new(),
            pods: TtlCache::new(),
        }
    }
}

impl Default for TopologyCaches {
    fn default() -> Self {
        TopologyCaches::new()
    }
}

/// The process-wide fetch engine: settings, shared caches, the client pool
/// and the external collaborators. Constructed once by the owning process
/// and injected into request handling — never ambient global state.
pub struct FetchEngine {
    pub settings: Settings,
    pub query_language: Arc<dyn QueryLanguage>,
    pub topology: TopologyCaches,
    pub clients: ClientPool,
    pub cluster_factory: Arc<dyn ClusterClientFactory>,
    pub database_factory: Arc<dyn DatabaseClientFactory>,
}

impl FetchEngine {
    /// Engine with the production collaborators (kube-rs clients, ClickHouse
    /// over HTTP).
    pub fn new(query_language: Arc<dyn QueryLanguage>, settings: Settings) -> Arc<FetchEngine> {
        let cluster_factory = Arc::new(KubeClientFactory {
            timeouts: ClientTimeouts {
                connect: settings.connect_timeout,
                read: settings.read_timeout,
            },
        });
        FetchEngine::with_collaborators(
            query_language,
            settings,
            cluster_factory,
            Arc::new(ClickhouseHttpFactory),
        )
    }

    /// Engine with explicit collaborator implementations; the seam tests and
    /// embedders use to substitute clients.
    pub fn with_collaborators(
        query_language: Arc<dyn QueryLanguage>,
        settings: Settings,
        cluster_factory: Arc<dyn ClusterClientFactory>,
        database_factory: Arc<dyn DatabaseClientFactory>,
    ) -> Arc<FetchEngine> {
        let clients = ClientPool::new(settings.client_pool_capacity);
        Arc::new(FetchEngine {
            settings,
            query_language,
            topology: TopologyCaches::new(),
            clients,
            cluster_factory,
            database_factory,
        })
    }

    /// The fetcher for a source kind. Dispatch is an explicit match on the
    /// kind enum.
    pub fn fetcher(self: Arc<Self>, kind: SourceKind) -> SourceFetcher {
        match kind {
            SourceKind::Clickhouse => SourceFetcher::Clickhouse(ClickhouseFetcher::new(self)),
            SourceKind::Kubernetes => SourceFetcher::Kubernetes(KubernetesFetcher::new(self)),
        }
    }
}
