use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::client::kube_api::{ClientTimeouts, KubeClusterApi};
use crate::core::client::kube_config::KubeConfigBundle;
use crate::core::client::ClusterApi;

/// Builds a live client for one (credential bundle, context) pair.
/// Injected so tests can count and script constructions.
#[async_trait]
pub trait ClusterClientFactory: Send + Sync {
    async fn build(
        &self,
        bundle: &KubeConfigBundle,
        context: &str,
    ) -> anyhow::Result<Arc<dyn ClusterApi>>;
}

/// Production factory backed by kube-rs.
pub struct KubeClientFactory {
    pub timeouts: ClientTimeouts,
}

#[async_trait]
impl ClusterClientFactory for KubeClientFactory {
    async fn build(
        &self,
        bundle: &KubeConfigBundle,
        context: &str,
    ) -> anyhow::Result<Arc<dyn ClusterApi>> {
        let api = KubeClusterApi::connect(bundle, context, self.timeouts).await?;
        Ok(Arc::new(api))
    }
}

/// Bounded pool of live cluster clients keyed by (content hash, context).
///
/// The lock is held across lookup-or-create so that concurrent callers
/// observing a miss never race duplicate expensive constructions. A failed
/// construction leaves no entry behind.
pub struct ClientPool {
    capacity: usize,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    entries: HashMap<String, Arc<dyn ClusterApi>>,
    recency: VecDeque<String>,
}

impl ClientPool {
    pub fn new(capacity: usize) -> ClientPool {
        ClientPool {
            capacity: capacity.max(1),
            inner: Mutex::new(PoolInner {
                entries: HashMap::new(),
                recency: VecDeque::new(),
            }),
        }
    }

    pub async fn get_or_create(
        &self,
        bundle: &KubeConfigBundle,
        context: &str,
        factory: &dyn ClusterClientFactory,
    ) -> anyhow::Result<Arc<dyn ClusterApi>> {
        let key = format!("{}:{}", bundle.content_hash, context);
        let mut inner = self.inner.lock().await;

        if let Some(client) = inner.entries.get(&key).cloned() {
            touch(&mut inner.recency, &key);
            return Ok(client);
        }

        let client = factory.build(bundle, context).await?;
        inner.entries.insert(key.clone(), client.clone());
        inner.recency.push_back(key.clone());
        while inner.entries.len() > self.capacity {
            match inner.recency.pop_front() {
                Some(stale) => {
                    inner.entries.remove(&stale);
                    debug!("evicted cluster client {}", stale);
                }
                None => break,
            }
        }
        Ok(client)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

fn touch(recency: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = recency.iter().position(|k| k == key) {
        recency.remove(pos);
    }
    recency.push_back(key.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::client::{
        ClusterError, DeploymentRecord, LogQuery, NamespaceRecord, PodRecord, Selectors,
    };
    use crate::model::source::KubernetesConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NullApi;

    #[async_trait]
    impl ClusterApi for NullApi {
        async fn list_namespaces(
            &self,
            _selectors: &Selectors,
        ) -> Result<Vec<NamespaceRecord>, ClusterError> {
            Ok(Vec::new())
        }

        async fn list_pods(
            &self,
            _namespace: &str,
            _selectors: &Selectors,
        ) -> Result<Vec<PodRecord>, ClusterError> {
            Ok(Vec::new())
        }

        async fn read_container_logs(&self, _query: &LogQuery) -> Result<String, ClusterError> {
            Ok(String::new())
        }

        async fn list_deployments(
            &self,
            _namespace: &str,
        ) -> Result<Vec<DeploymentRecord>, ClusterError> {
            Ok(Vec::new())
        }
    }

    struct CountingFactory {
        builds: AtomicUsize,
        fail: bool,
    }

    impl CountingFactory {
        fn new() -> CountingFactory {
            CountingFactory {
                builds: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl ClusterClientFactory for CountingFactory {
        async fn build(
            &self,
            _bundle: &KubeConfigBundle,
            _context: &str,
        ) -> anyhow::Result<Arc<dyn ClusterApi>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            // Keep the construction slow enough that racing callers would
            // overlap without the lock.
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail {
                anyhow::bail!("construction failed");
            }
            Ok(Arc::new(NullApi))
        }
    }

    fn bundle() -> KubeConfigBundle {
        let conn = KubernetesConnection {
            kubeconfig: "apiVersion: v1\nkind: Config\ncontexts: []\nclusters: []\nusers: []\n"
                .to_string(),
            ..Default::default()
        };
        KubeConfigBundle::load(&conn).unwrap()
    }

    #[tokio::test]
    async fn concurrent_misses_construct_exactly_once() {
        let pool = Arc::new(ClientPool::new(100));
        let factory = Arc::new(CountingFactory::new());
        let bundle = Arc::new(bundle());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let factory = factory.clone();
            let bundle = bundle.clone();
            handles.push(tokio::spawn(async move {
                pool.get_or_create(&bundle, "prod-a", factory.as_ref())
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let pool = ClientPool::new(2);
        let factory = CountingFactory::new();
        let bundle = bundle();

        pool.get_or_create(&bundle, "a", &factory).await.unwrap();
        pool.get_or_create(&bundle, "b", &factory).await.unwrap();
        // Touch "a" so "b" is now the oldest.
        pool.get_or_create(&bundle, "a", &factory).await.unwrap();
        pool.get_or_create(&bundle, "c", &factory).await.unwrap();

        assert_eq!(pool.len().await, 2);
        assert_eq!(factory.builds.load(Ordering::SeqCst), 3);

        // "a" survived the eviction; "b" did not and must be rebuilt.
        pool.get_or_create(&bundle, "a", &factory).await.unwrap();
        assert_eq!(factory.builds.load(Ordering::SeqCst), 3);
        pool.get_or_create(&bundle, "b", &factory).await.unwrap();
        assert_eq!(factory.builds.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failed_construction_does_not_poison_the_pool() {
        let pool = ClientPool::new(10);
        let mut factory = CountingFactory::new();
        factory.fail = true;
        let bundle = bundle();

        assert!(pool.get_or_create(&bundle, "a", &factory).await.is_err());
        assert_eq!(pool.len().await, 0);

        let factory = CountingFactory::new();
        assert!(pool.get_or_create(&bundle, "a", &factory).await.is_ok());
        assert_eq!(pool.len().await, 1);
    }
}
