use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::core::cache::cache_key;
use crate::core::client::kube_config::{ClusterContext, KubeConfigBundle};
use crate::core::client::{
    ClusterApi, DeploymentRecord, NamespaceMap, PodDetail, PodTopology, Selectors,
};
use crate::core::fanout;
use crate::engine::FetchEngine;
use crate::errors::{EngineError, FetchError};
use crate::query::{parse_optional, ParsedQuery};

/// Everything that narrows discovery for one request. All filter fields are
/// raw text; parsing happens once at engine construction.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryParams {
    pub conn_id: i64,
    pub source_id: i64,
    pub max_concurrent_requests: usize,
    pub context_filter: String,
    pub namespace_label_selector: String,
    pub namespace_field_selector: String,
    pub namespace_filter: String,
    pub pods_label_selector: String,
    pub pods_field_selector: String,
    pub pods_filter: String,
    pub selected_contexts: BTreeSet<String>,
    pub selected_namespaces: BTreeSet<String>,
}

/// The validated, resolved set of context names for one request.
///
/// This type is the proof that context validation ran: the namespace and pod
/// stages take it by reference, so resolution cannot be skipped by accident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContexts(BTreeSet<String>);

impl ResolvedContexts {
    pub fn names(&self) -> &BTreeSet<String> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Request-scoped discovery state: contexts -> namespaces -> pods, each
/// stage memoized here and persisted in the engine's TTL cache under a key
/// derived from every parameter that affects the stage's result.
pub struct DiscoveryEngine {
    engine: Arc<FetchEngine>,
    bundle: Arc<KubeConfigBundle>,
    params: DiscoveryParams,

    context_filter: Option<Arc<dyn ParsedQuery>>,
    namespace_filter: Option<Arc<dyn ParsedQuery>>,
    pods_filter: Option<Arc<dyn ParsedQuery>>,
    namespace_selectors: Selectors,
    pod_selectors: Selectors,

    contexts_cache_key: String,
    namespaces_cache_key: String,
    pods_cache_key: String,

    allowed_contexts: OnceCell<Vec<ClusterContext>>,
    all_namespaces: OnceCell<NamespaceMap>,
    pods: OnceCell<PodTopology>,

    errors: Mutex<Vec<FetchError>>,
}

impl DiscoveryEngine {
    pub fn new(
        engine: Arc<FetchEngine>,
        bundle: Arc<KubeConfigBundle>,
        params: DiscoveryParams,
    ) -> Result<DiscoveryEngine, EngineError> {
        let language = engine.query_language.clone();
        let context_filter = parse_optional(language.as_ref(), &params.context_filter)
            .map_err(|err| EngineError::parse(format!("context filter: {}", err)))?;
        let namespace_filter = parse_optional(language.as_ref(), &params.namespace_filter)
            .map_err(|err| EngineError::parse(format!("namespace filter: {}", err)))?;
        let pods_filter = parse_optional(language.as_ref(), &params.pods_filter)
            .map_err(|err| EngineError::parse(format!("pod filter: {}", err)))?;

        let conn_id = params.conn_id.to_string();
        let source_id = params.source_id.to_string();
        let selected_contexts = join_sorted(&params.selected_contexts);
        let selected_namespaces = join_sorted(&params.selected_namespaces);

        let contexts_cache_key = cache_key(&[
            "k8s_contexts",
            &conn_id,
            &source_id,
            &params.context_filter,
            &bundle.content_hash,
        ]);
        let namespaces_cache_key = cache_key(&[
            "k8s_namespaces",
            &conn_id,
            &source_id,
            &params.namespace_label_selector,
            &params.namespace_field_selector,
            &params.namespace_filter,
            &selected_contexts,
            &bundle.content_hash,
        ]);
        let pods_cache_key = cache_key(&[
            "k8s_pods",
            &conn_id,
            &source_id,
            &params.namespace_label_selector,
            &params.namespace_field_selector,
            &params.namespace_filter,
            &params.pods_label_selector,
            &params.pods_field_selector,
            &params.pods_filter,
            &selected_contexts,
            &selected_namespaces,
            &bundle.content_hash,
        ]);

        let namespace_selectors = Selectors {
            labels: params.namespace_label_selector.clone(),
            fields: params.namespace_field_selector.clone(),
        };
        let pod_selectors = Selectors {
            labels: params.pods_label_selector.clone(),
            fields: params.pods_field_selector.clone(),
        };

        Ok(DiscoveryEngine {
            engine,
            bundle,
            params,
            context_filter,
            namespace_filter,
            pods_filter,
            namespace_selectors,
            pod_selectors,
            contexts_cache_key,
            namespaces_cache_key,
            pods_cache_key,
            allowed_contexts: OnceCell::new(),
            all_namespaces: OnceCell::new(),
            pods: OnceCell::new(),
            errors: Mutex::new(Vec::new()),
        })
    }

    pub fn bundle(&self) -> &KubeConfigBundle {
        &self.bundle
    }

    pub fn max_concurrent_requests(&self) -> usize {
        if self.params.max_concurrent_requests > 0 {
            self.params.max_concurrent_requests
        } else {
            self.engine.settings.default_max_concurrent_requests
        }
    }

    pub fn record_error(&self, operation: &str, details: BTreeMap<String, String>) {
        self.errors
            .lock()
            .push(FetchError::warn(operation, details));
    }

    pub fn errors(&self) -> Vec<FetchError> {
        self.errors.lock().clone()
    }

    pub async fn client_for(&self, context: &str) -> anyhow::Result<Arc<dyn ClusterApi>> {
        self.engine
            .clients
            .get_or_create(
                &self.bundle,
                context,
                self.engine.cluster_factory.as_ref(),
            )
            .await
    }

    /// Contexts the connection is allowed to use: the kubeconfig's declared
    /// contexts, narrowed by the optional context filter expression.
    /// No network involved; cached for the topology TTL anyway so repeated
    /// requests share the filter evaluation.
    pub async fn allowed_contexts(&self) -> &[ClusterContext] {
        self.allowed_contexts
            .get_or_init(|| async {
                if let Some(cached) = self.engine.topology.contexts.get(&self.contexts_cache_key) {
                    debug!("context topology served from cache");
                    return cached;
                }
                let contexts = self.bundle.contexts();
                let matched = match &self.context_filter {
                    Some(filter) => contexts
                        .into_iter()
                        .filter(|ctx| filter.matches(&ctx.record()))
                        .collect(),
                    None => contexts,
                };
                self.engine.topology.contexts.set(
                    &self.contexts_cache_key,
                    matched.clone(),
                    self.engine.settings.topology_ttl,
                );
                matched
            })
            .await
    }

    /// Resolve the contexts this request will actually fan out to.
    ///
    /// Policy, first match wins:
    /// 1. explicit selection — every name must be in the allowed set;
    /// 2. the kubeconfig's current-context, when allowed;
    /// 3. no context filter supplied — only the FIRST allowed context.
    ///    This is a deliberate throughput guard: with no narrowing signal
    ///    from the caller, fanning out to every declared cluster at once
    ///    produces connection bursts and mass timeouts. Callers wanting all
    ///    contexts must say so via a filter or explicit selection;
    /// 4. the full allowed set.
    pub async fn resolve_contexts(&self) -> Result<ResolvedContexts, EngineError> {
        let allowed = self.allowed_contexts().await;
        let allowed_names: BTreeSet<String> =
            allowed.iter().map(|ctx| ctx.name.clone()).collect();

        if allowed_names.is_empty() {
            return Err(EngineError::configuration(
                "No contexts available for this connection",
            ));
        }

        if !self.params.selected_contexts.is_empty() {
            let invalid: Vec<&str> = self
                .params
                .selected_contexts
                .iter()
                .filter(|name| !allowed_names.contains(*name))
                .map(String::as_str)
                .collect();
            if !invalid.is_empty() {
                return Err(EngineError::configuration(format!(
                    "Invalid contexts: {}. These contexts are not available for this connection.",
                    invalid.join(", ")
                )));
            }
            return Ok(ResolvedContexts(self.params.selected_contexts.clone()));
        }

        if let Some(current) = &self.bundle.current_context {
            if allowed_names.contains(current) {
                debug!("using kubeconfig current-context {}", current);
                return Ok(ResolvedContexts(BTreeSet::from([current.clone()])));
            }
        }

        if self.params.context_filter.is_empty() {
            let first = allowed[0].name.clone();
            debug!(
                "no context filter or current-context; limiting to first declared context {}",
                first
            );
            return Ok(ResolvedContexts(BTreeSet::from([first])));
        }

        Ok(ResolvedContexts(allowed_names))
    }

    /// Namespace names per context after selector/filter narrowing, before
    /// the request's explicit namespace selection.
    async fn all_namespaces(&self, contexts: &ResolvedContexts) -> &NamespaceMap {
        self.all_namespaces
            .get_or_init(|| async {
                if let Some(cached) = self
                    .engine
                    .topology
                    .namespaces
                    .get(&self.namespaces_cache_key)
                {
                    debug!("namespace topology served from cache");
                    return cached;
                }

                let items: Vec<(String, String)> = contexts
                    .names()
                    .iter()
                    .map(|name| (name.clone(), name.clone()))
                    .collect();
                let outcome = fanout::bounded(
                    items,
                    self.engine.settings.context_fanout,
                    |context: String| async move {
                        let client = self.client_for(&context).await?;
                        let records = client.list_namespaces(&self.namespace_selectors).await?;
                        let mut names = Vec::new();
                        for ns in records {
                            if let Some(filter) = &self.namespace_filter {
                                if !filter.matches(&ns.record) {
                                    continue;
                                }
                            }
                            names.push(ns.name);
                        }
                        Ok(names)
                    },
                )
                .await;

                let result: NamespaceMap = outcome.ok.into_iter().collect();
                if outcome.errors.is_empty() {
                    self.engine.topology.namespaces.set(
                        &self.namespaces_cache_key,
                        result.clone(),
                        self.engine.settings.topology_ttl,
                    );
                } else {
                    warn!("namespace fetch errors: {:?}", outcome.errors);
                    self.record_error("get_namespaces", outcome.errors);
                }
                result
            })
            .await
    }

    /// Namespaces per context with the request's explicit selection applied.
    pub async fn namespaces(&self, contexts: &ResolvedContexts) -> NamespaceMap {
        let all = self.all_namespaces(contexts).await;
        if self.params.selected_namespaces.is_empty() {
            return all.clone();
        }
        all.iter()
            .map(|(context, names)| {
                let kept = names
                    .iter()
                    .filter(|name| self.params.selected_namespaces.contains(*name))
                    .cloned()
                    .collect();
                (context.clone(), kept)
            })
            .collect()
    }

    /// Full pod topology for the resolved contexts. Parallel across contexts
    /// and, within each context, across namespaces.
    pub async fn pods(&self, contexts: &ResolvedContexts) -> &PodTopology {
        self.pods
            .get_or_init(|| async {
                if let Some(cached) = self.engine.topology.pods.get(&self.pods_cache_key) {
                    debug!("pod topology served from cache");
                    return cached;
                }

                let (topology, errors) = self.fetch_pods(contexts).await;
                if errors.is_empty() {
                    self.engine.topology.pods.set(
                        &self.pods_cache_key,
                        topology.clone(),
                        self.engine.settings.topology_ttl,
                    );
                } else {
                    warn!("pod fetch errors: {:?}", errors);
                    self.record_error("get_pods", errors);
                }
                topology
            })
            .await
    }

    async fn fetch_pods(
        &self,
        contexts: &ResolvedContexts,
    ) -> (PodTopology, BTreeMap<String, String>) {
        let all_namespaces = self.all_namespaces(contexts).await.clone();
        let max_concurrent = self.max_concurrent_requests();

        let items: Vec<(String, String)> = contexts
            .names()
            .iter()
            .map(|name| (name.clone(), name.clone()))
            .collect();

        let outcome = fanout::bounded(
            items,
            self.engine.settings.context_fanout,
            |context: String| {
                let namespaces: Vec<String> = all_namespaces
                    .get(&context)
                    .map(|names| {
                        names
                            .iter()
                            .filter(|name| {
                                self.params.selected_namespaces.is_empty()
                                    || self.params.selected_namespaces.contains(*name)
                            })
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();

                async move {
                    let client = self.client_for(&context).await?;
                    let ns_items: Vec<(String, String)> = namespaces
                        .into_iter()
                        .map(|name| (name.clone(), name))
                        .collect();
                    let inner = fanout::bounded(ns_items, max_concurrent, |namespace: String| {
                        let client = client.clone();
                        async move {
                            let pods = client.list_pods(&namespace, &self.pod_selectors).await?;
                            let mut kept: HashMap<String, PodDetail> = HashMap::new();
                            for pod in &pods {
                                if let Some(filter) = &self.pods_filter {
                                    if !filter.matches(&pod.record) {
                                        continue;
                                    }
                                }
                                kept.insert(pod.name.clone(), PodDetail::from(pod));
                            }
                            Ok(kept)
                        }
                    })
                    .await;

                    let per_namespace: HashMap<String, HashMap<String, PodDetail>> =
                        inner.ok.into_iter().collect();
                    Ok((per_namespace, inner.errors))
                }
            },
        )
        .await;

        let mut topology: PodTopology = HashMap::new();
        let mut errors: BTreeMap<String, String> = BTreeMap::new();
        for (context, (per_namespace, inner_errors)) in outcome.ok {
            for (namespace, message) in inner_errors {
                errors.insert(format!("{}/{}", context, namespace), message);
            }
            topology.insert(context, per_namespace);
        }
        for (context, message) in outcome.errors {
            errors.insert(context, message);
        }
        (topology, errors)
    }

    /// Deployment inventory across the resolved contexts, sorted by
    /// (namespace, name). A namespace that fails to list keeps its siblings.
    pub async fn deployments(&self, contexts: &ResolvedContexts) -> Vec<DeploymentRecord> {
        let items: Vec<(String, String)> = contexts
            .names()
            .iter()
            .map(|name| (name.clone(), name.clone()))
            .collect();

        let outcome = fanout::bounded(
            items,
            self.max_concurrent_requests(),
            |context: String| async move {
                let client = self.client_for(&context).await?;
                let records = client.list_namespaces(&self.namespace_selectors).await?;
                let mut deployments = Vec::new();
                for ns in records {
                    if let Some(filter) = &self.namespace_filter {
                        if !filter.matches(&ns.record) {
                            continue;
                        }
                    }
                    match client.list_deployments(&ns.name).await {
                        Ok(found) => deployments.extend(found),
                        Err(err) => {
                            warn!(
                                "error listing deployments in {}/{}: {}",
                                context, ns.name, err
                            );
                        }
                    }
                }
                Ok(deployments)
            },
        )
        .await;

        if !outcome.errors.is_empty() {
            self.record_error("get_deployments", outcome.errors.clone());
        }

        let mut all: Vec<DeploymentRecord> = outcome.ok.into_values().flatten().collect();
        all.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        all
    }
}

fn join_sorted(values: &BTreeSet<String>) -> String {
    values.iter().cloned().collect::<Vec<_>>().join(",")
}
