//! Ordered startup of the watch sources
//!
//! Replicasets start first, then the other object kinds together; the pod
//! source starts last and waits (bounded) for everything before it to sync so
//! the first pod batch can already resolve owners.

use super::CacheState;
use crate::k8s::types::ResourceKind;
use crate::k8s::watcher::{SyncHandle, WatchSource};
use futures::future::join_all;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// A source with its handlers registered, waiting to be started
pub(crate) struct Registered<K> {
    pub source: Box<dyn WatchSource<K>>,
    pub sync: SyncHandle,
}

pub(crate) struct Sources {
    pub pods: Registered<Pod>,
    pub replica_sets: Option<Registered<ReplicaSet>>,
    pub namespaces: Option<Registered<Namespace>>,
    pub nodes: Option<Registered<Node>>,
    pub deployments: Option<Registered<Deployment>>,
    pub stateful_sets: Option<Registered<StatefulSet>>,
}

fn spawn_source<K: 'static>(
    registered: Registered<K>,
    tracker: &TaskTracker,
    stop: &CancellationToken,
    dependencies: &mut Vec<(ResourceKind, SyncHandle)>,
) {
    let kind = registered.source.kind();
    debug!("Spawning {} watch", kind);
    tracker.spawn(registered.source.run(stop.clone()));
    dependencies.push((kind, registered.sync));
}

/// Spawn every configured source in dependency order and return the pod
/// source's sync handle.
pub(crate) fn launch(
    sources: Sources,
    tracker: &TaskTracker,
    stop: &CancellationToken,
    dependency_timeout: Duration,
) -> SyncHandle {
    let mut dependencies = Vec::new();

    if let Some(replica_sets) = sources.replica_sets {
        spawn_source(replica_sets, tracker, stop, &mut dependencies);
    }
    if let Some(namespaces) = sources.namespaces {
        spawn_source(namespaces, tracker, stop, &mut dependencies);
    }
    if let Some(nodes) = sources.nodes {
        spawn_source(nodes, tracker, stop, &mut dependencies);
    }
    if let Some(deployments) = sources.deployments {
        spawn_source(deployments, tracker, stop, &mut dependencies);
    }
    if let Some(stateful_sets) = sources.stateful_sets {
        spawn_source(stateful_sets, tracker, stop, &mut dependencies);
    }

    let Registered { source, sync } = sources.pods;
    let stop = stop.clone();
    tracker.spawn(async move {
        if !wait_for_dependencies(&dependencies, dependency_timeout, &stop).await {
            return;
        }
        source.run(stop).await;
    });

    sync
}

/// Wait for all dependency sources to sync. A timeout only logs; returns
/// `false` if the stop signal fired first.
async fn wait_for_dependencies(
    dependencies: &[(ResourceKind, SyncHandle)],
    timeout: Duration,
    stop: &CancellationToken,
) -> bool {
    if dependencies.is_empty() {
        return !stop.is_cancelled();
    }

    let synced = join_all(dependencies.iter().map(|(_, sync)| sync.wait_synced()));

    tokio::select! {
        biased;
        _ = stop.cancelled() => false,
        result = tokio::time::timeout(timeout, synced) => {
            if result.is_err() {
                let pending: Vec<&str> = dependencies
                    .iter()
                    .filter(|(_, sync)| !sync.has_synced())
                    .map(|(kind, _)| kind.as_str())
                    .collect();
                warn!(
                    "Watches not synced within {:?}, starting pod watch anyway: {}",
                    timeout,
                    pending.join(", ")
                );
            } else {
                debug!("Pod watch dependencies synced");
            }
            true
        }
    }
}

/// Periodically apply delete requests older than the grace period
pub(crate) async fn run_eviction_loop(
    state: Arc<CacheState>,
    interval: Duration,
    stop: CancellationToken,
) {
    info!("Starting pod eviction loop every {:?}", interval);

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                state.evict_expired(Instant::now());
            }
        }
    }

    debug!("Pod eviction loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::replay::ChannelWatchSource;
    use crate::k8s::watcher::{ResourceEventHandler, Tombstone};

    struct Noop;

    impl ResourceEventHandler<Namespace> for Noop {
        fn on_add(&self, _: &Namespace) {}
        fn on_update(&self, _: &Namespace, _: &Namespace) {}
        fn on_delete(&self, _: &Tombstone<Namespace>) {}
    }

    #[tokio::test]
    async fn test_dependency_timeout_still_proceeds() {
        let (mut source, _feed) = ChannelWatchSource::<Namespace>::new(ResourceKind::Namespace);
        let sync = source.add_event_handler(Arc::new(Noop));
        let stop = CancellationToken::new();

        let tracker = TaskTracker::new();
        let mut deps = Vec::new();
        spawn_source(
            Registered {
                source: Box::new(source),
                sync,
            },
            &tracker,
            &stop,
            &mut deps,
        );

        assert!(wait_for_dependencies(&deps, Duration::from_millis(20), &stop).await);
        stop.cancel();
        assert!(!wait_for_dependencies(&deps, Duration::from_secs(5), &stop).await);
    }

    #[tokio::test]
    async fn test_dependencies_synced() {
        let (mut source, feed) = ChannelWatchSource::<Namespace>::new(ResourceKind::Namespace);
        let sync = source.add_event_handler(Arc::new(Noop));
        let stop = CancellationToken::new();

        let tracker = TaskTracker::new();
        let mut deps = Vec::new();
        spawn_source(
            Registered {
                source: Box::new(source),
                sync,
            },
            &tracker,
            &stop,
            &mut deps,
        );
        feed.synced();

        assert!(wait_for_dependencies(&deps, Duration::from_secs(5), &stop).await);
        assert!(deps[0].1.has_synced());
        stop.cancel();
    }
}
