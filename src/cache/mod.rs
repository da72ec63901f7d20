//! Watch-driven pod metadata cache
//!
//! [`WatchCache`] owns the pod table, the per-kind object stores and the
//! delete queue, and wires them to the watch sources handed out by a
//! [`SourceProvider`]. Lookups are non-blocking and can be served before the
//! initial sync; they simply miss more often.

pub mod eviction;
mod handlers;
pub mod identity;
pub mod pod_table;
mod startup;
pub mod stores;

use crate::config::CacheOptions;
use crate::extract::rules::{ExtractionRules, MetadataFrom};
use crate::extract::trim::{trim_pod, trim_replica_set};
use crate::extract::Extractor;
use crate::k8s::client::{NamespaceScope, PodScope, SourceProvider};
use crate::k8s::types::{
    DeploymentRecord, NamespaceRecord, NodeRecord, PodRecord, ResourceKind, StatefulSetRecord,
};
use crate::k8s::watcher::{ResourceEventHandler, SyncHandle, WatchSource};
use crate::metrics::CacheMetrics;
use crate::{Error, Result};
use eviction::DeleteQueue;
use identity::IdentityResolver;
use k8s_openapi::api::core::v1::Pod;
use kubemeta_common::PodIdentifier;
use parking_lot::{Mutex, RwLock};
use pod_table::PodTable;
use startup::{Registered, Sources};
use std::sync::Arc;
use std::time::Duration;
use stores::ObjectStores;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Everything guarded by the cache's single table lock
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub pods: PodTable,
    pub stores: ObjectStores,
}

/// State shared between the watch handlers, the eviction loop and lookups
pub(crate) struct CacheState {
    tables: RwLock<Tables>,
    deletes: Mutex<DeleteQueue>,
    extractor: Extractor,
    resolver: IdentityResolver,
    metrics: CacheMetrics,
    delete_grace_period: Duration,
}

impl CacheState {
    /// Apply queued deletes older than the grace period. Returns the number
    /// of identifiers removed.
    fn evict_expired(&self, now: Instant) -> usize {
        let expired = self
            .deletes
            .lock()
            .drain_expired(now, self.delete_grace_period);

        let removed = {
            let mut tables = self.tables.write();
            let removed = expired
                .iter()
                .filter(|req| tables.pods.remove_if_named(&req.id, &req.pod_name))
                .count();
            self.metrics.set_pod_table_size(tables.pods.len());
            removed
        };

        if !expired.is_empty() {
            debug!(
                "Evicted {} of {} expired pod identifiers",
                removed,
                expired.len()
            );
        }
        removed
    }
}

#[derive(Debug, Clone, Copy)]
struct StartOptions {
    wait_for_metadata: bool,
    wait_for_metadata_timeout: Duration,
    delete_interval: Duration,
    dependency_sync_timeout: Duration,
}

pub struct WatchCache {
    state: Arc<CacheState>,
    sources: Mutex<Option<Sources>>,
    pod_sync: SyncHandle,
    options: StartOptions,
    stop: CancellationToken,
    tracker: TaskTracker,
}

impl WatchCache {
    /// Build the cache and register its handlers on the sources it needs.
    /// Selector and source construction errors are returned here.
    pub fn new(
        options: CacheOptions,
        provider: &dyn SourceProvider,
        metrics: CacheMetrics,
    ) -> Result<Self> {
        if options.delete_interval.is_zero() {
            return Err(Error::ConfigError(
                "delete_interval must be greater than zero".to_string(),
            ));
        }
        let pod_scope = PodScope::from_filters(&options.filters)?;
        let rules = options.rules;
        let namespace = options.filters.namespace.as_deref();

        let state = Arc::new(CacheState {
            tables: RwLock::new(Tables::default()),
            deletes: Mutex::new(DeleteQueue::new()),
            extractor: Extractor::new(rules.clone(), options.excludes),
            resolver: IdentityResolver::new(options.associations),
            metrics,
            delete_grace_period: options.delete_grace_period,
        });

        let mut pods = provider.pods(&pod_scope)?;
        let pod_rules = rules.clone();
        pods.set_transform(Box::new(move |pod: Pod| trim_pod(pod, &pod_rules)));
        let pods = register(pods, &state);
        let pod_sync = pods.sync.clone();

        let plan = WatchPlan::for_rules(&rules);

        let replica_sets = if plan.replica_sets {
            let mut source = provider.replica_sets(namespace)?;
            source.set_transform(Box::new(trim_replica_set));
            Some(register(source, &state))
        } else {
            None
        };

        let namespaces = match &plan.namespaces {
            Some(scope) => Some(register(provider.namespaces(scope)?, &state)),
            None => None,
        };

        let nodes = if plan.nodes {
            Some(register(
                provider.nodes(options.filters.node.as_deref())?,
                &state,
            ))
        } else {
            None
        };

        let deployments = if plan.deployments {
            Some(register(provider.deployments(namespace)?, &state))
        } else {
            None
        };

        let stateful_sets = if plan.stateful_sets {
            Some(register(provider.stateful_sets(namespace)?, &state))
        } else {
            None
        };

        Ok(Self {
            state,
            sources: Mutex::new(Some(Sources {
                pods,
                replica_sets,
                namespaces,
                nodes,
                deployments,
                stateful_sets,
            })),
            pod_sync,
            options: StartOptions {
                wait_for_metadata: options.wait_for_metadata,
                wait_for_metadata_timeout: options.wait_for_metadata_timeout,
                delete_interval: options.delete_interval,
                dependency_sync_timeout: options.dependency_sync_timeout,
            },
            stop: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Start the eviction loop and every watch source. With
    /// `wait_for_metadata` set, also wait for the pod watch's initial sync.
    pub async fn start(&self) -> Result<()> {
        let sources = self.sources.lock().take().ok_or(Error::AlreadyStarted)?;

        info!("Starting watch cache");

        self.tracker.spawn(startup::run_eviction_loop(
            Arc::clone(&self.state),
            self.options.delete_interval,
            self.stop.clone(),
        ));

        let pod_sync = startup::launch(
            sources,
            &self.tracker,
            &self.stop,
            self.options.dependency_sync_timeout,
        );

        if self.options.wait_for_metadata {
            self.wait_for_pods(pod_sync).await?;
            info!("Pod metadata synced");
        }

        Ok(())
    }

    async fn wait_for_pods(&self, pod_sync: SyncHandle) -> Result<()> {
        let timeout = self.options.wait_for_metadata_timeout;

        tokio::select! {
            biased;
            _ = self.stop.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, pod_sync.wait_synced()) => match result {
                Ok(true) => Ok(()),
                Ok(false) => Err(Error::SyncAborted),
                Err(_) => Err(Error::SyncTimeout { timeout }),
            },
        }
    }

    /// Signal every task to stop without waiting for them
    pub fn stop(&self) {
        self.stop.cancel();
        self.tracker.close();
    }

    /// Stop and wait for all watch and eviction tasks to finish
    pub async fn shutdown(&self) {
        self.stop();
        self.tracker.wait().await;
        info!("Watch cache stopped");
    }

    pub fn has_synced(&self) -> bool {
        self.pod_sync.has_synced()
    }

    pub fn get_pod(&self, id: &PodIdentifier) -> Option<Arc<PodRecord>> {
        let found = self.state.tables.read().pods.lookup(id);
        if found.is_none() {
            self.state.metrics.record_lookup_miss();
        }
        found
    }

    pub fn get_namespace(&self, name: &str) -> Option<Arc<NamespaceRecord>> {
        self.state.tables.read().stores.namespaces.get(name).cloned()
    }

    pub fn get_node(&self, name: &str) -> Option<Arc<NodeRecord>> {
        self.state.tables.read().stores.nodes.get(name).cloned()
    }

    pub fn get_deployment(&self, uid: &str) -> Option<Arc<DeploymentRecord>> {
        self.state.tables.read().stores.deployments.get(uid).cloned()
    }

    pub fn get_stateful_set(&self, uid: &str) -> Option<Arc<StatefulSetRecord>> {
        self.state.tables.read().stores.stateful_sets.get(uid).cloned()
    }

    /// Number of identifiers in the pod table
    pub fn pod_table_len(&self) -> usize {
        self.state.tables.read().pods.len()
    }

    /// Number of delete requests waiting for their grace period
    pub fn pending_deletes(&self) -> usize {
        self.state.deletes.lock().len()
    }

    /// Apply delete requests that are past their grace period as of `now`.
    /// The eviction loop calls this on every tick.
    pub fn evict_expired(&self, now: Instant) -> usize {
        self.state.evict_expired(now)
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.state.metrics
    }
}

impl Drop for WatchCache {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn register<K>(mut source: Box<dyn WatchSource<K>>, state: &Arc<CacheState>) -> Registered<K>
where
    K: 'static,
    CacheState: ResourceEventHandler<K>,
{
    let handler: Arc<dyn ResourceEventHandler<K>> = state.clone();
    let sync = source.add_event_handler(handler);
    Registered { source, sync }
}

/// Which watches besides pods a set of extraction rules needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPlan {
    pub replica_sets: bool,
    /// Namespaces are watched fully when rules read their metadata, and only
    /// `kube-system` when just the cluster uid is needed.
    pub namespaces: Option<NamespaceScope>,
    pub nodes: bool,
    pub deployments: bool,
    pub stateful_sets: bool,
}

impl WatchPlan {
    pub fn for_rules(rules: &ExtractionRules) -> Self {
        let namespaces = if rules.targets(MetadataFrom::Namespace) {
            Some(NamespaceScope::All)
        } else if rules.cluster_uid {
            Some(NamespaceScope::KubeSystem)
        } else {
            None
        };

        Self {
            replica_sets: rules.needs_replica_sets(),
            namespaces,
            nodes: rules.targets(MetadataFrom::Node) || rules.node_uid,
            deployments: rules.targets(MetadataFrom::Deployment),
            stateful_sets: rules.targets(MetadataFrom::StatefulSet),
        }
    }

    /// Kinds watched under this plan, pods included
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds = vec![ResourceKind::Pod];
        if self.replica_sets {
            kinds.push(ResourceKind::ReplicaSet);
        }
        if self.namespaces.is_some() {
            kinds.push(ResourceKind::Namespace);
        }
        if self.nodes {
            kinds.push(ResourceKind::Node);
        }
        if self.deployments {
            kinds.push(ResourceKind::Deployment);
        }
        if self.stateful_sets {
            kinds.push(ResourceKind::StatefulSet);
        }
        kinds
    }
}
