//! Channel-fed watch sources
//!
//! Lets a cache run without a cluster: events are pushed through a
//! [`ChannelFeed`] and go through the same dispatch path as live watches.
//! Used by the integration tests and by anything replaying recorded state.

use super::client::{NamespaceScope, PodScope, SourceProvider};
use super::types::ResourceKind;
use super::watcher::{EventDispatcher, ResourceEventHandler, SyncHandle, Transform, WatchSource};
use crate::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::runtime::watcher::Event;
use kube::Resource;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

enum FeedItem<K> {
    Event(Event<K>),
    Barrier(oneshot::Sender<()>),
}

/// Sending half for one replayed kind
pub struct ChannelFeed<K> {
    tx: mpsc::UnboundedSender<FeedItem<K>>,
}

impl<K> Clone for ChannelFeed<K> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<K> ChannelFeed<K> {
    fn send(&self, event: Event<K>) {
        // the source may already be stopped
        let _ = self.tx.send(FeedItem::Event(event));
    }

    /// Add or update depending on whether the object was seen before
    pub fn apply(&self, obj: K) {
        self.send(Event::Apply(obj));
    }

    pub fn delete(&self, obj: K) {
        self.send(Event::Delete(obj));
    }

    /// Full listing; objects missing from it are deleted as final state
    /// unknown, and the source reports synced afterwards.
    pub fn snapshot(&self, objs: impl IntoIterator<Item = K>) {
        self.send(Event::Init);
        for obj in objs {
            self.send(Event::InitApply(obj));
        }
        self.send(Event::InitDone);
    }

    /// Mark the initial listing complete without any objects
    pub fn synced(&self) {
        self.snapshot(std::iter::empty());
    }

    /// Wait until everything sent so far has been dispatched. Returns
    /// immediately if the source is not running.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(FeedItem::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

pub struct ChannelWatchSource<K> {
    rx: mpsc::UnboundedReceiver<FeedItem<K>>,
    dispatcher: EventDispatcher<K>,
}

impl<K: Resource + Clone> ChannelWatchSource<K> {
    pub fn new(kind: ResourceKind) -> (Self, ChannelFeed<K>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            rx,
            dispatcher: EventDispatcher::new(kind),
        };
        (source, ChannelFeed { tx })
    }
}

#[async_trait]
impl<K> WatchSource<K> for ChannelWatchSource<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    fn kind(&self) -> ResourceKind {
        self.dispatcher.kind()
    }

    fn set_transform(&mut self, transform: Transform<K>) {
        self.dispatcher.set_transform(transform);
    }

    fn add_event_handler(&mut self, handler: Arc<dyn ResourceEventHandler<K>>) -> SyncHandle {
        self.dispatcher.add_handler(handler)
    }

    async fn run(self: Box<Self>, stop: CancellationToken) {
        let Self {
            mut rx,
            mut dispatcher,
        } = *self;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                item = rx.recv() => match item {
                    Some(FeedItem::Event(event)) => dispatcher.dispatch(event),
                    Some(FeedItem::Barrier(done)) => {
                        let _ = done.send(());
                    }
                    None => break,
                },
            }
        }

        debug!("{} replay source stopped", dispatcher.kind());
    }
}

/// Feeds for every kind a [`ChannelSourceProvider`] can hand out
pub struct ChannelFeeds {
    pub pods: ChannelFeed<Pod>,
    pub namespaces: ChannelFeed<Namespace>,
    pub nodes: ChannelFeed<Node>,
    pub deployments: ChannelFeed<Deployment>,
    pub stateful_sets: ChannelFeed<StatefulSet>,
    pub replica_sets: ChannelFeed<ReplicaSet>,
}

/// Source provider backed by in-process channels. Each source can be taken
/// once; the provider remembers which kinds and scopes were requested.
pub struct ChannelSourceProvider {
    pods: Mutex<Option<ChannelWatchSource<Pod>>>,
    namespaces: Mutex<Option<ChannelWatchSource<Namespace>>>,
    nodes: Mutex<Option<ChannelWatchSource<Node>>>,
    deployments: Mutex<Option<ChannelWatchSource<Deployment>>>,
    stateful_sets: Mutex<Option<ChannelWatchSource<StatefulSet>>>,
    replica_sets: Mutex<Option<ChannelWatchSource<ReplicaSet>>>,
    requested: Mutex<HashSet<ResourceKind>>,
    namespace_scope: Mutex<Option<NamespaceScope>>,
}

impl ChannelSourceProvider {
    pub fn new() -> (Self, ChannelFeeds) {
        let (pods, pods_feed) = ChannelWatchSource::new(ResourceKind::Pod);
        let (namespaces, namespaces_feed) = ChannelWatchSource::new(ResourceKind::Namespace);
        let (nodes, nodes_feed) = ChannelWatchSource::new(ResourceKind::Node);
        let (deployments, deployments_feed) = ChannelWatchSource::new(ResourceKind::Deployment);
        let (stateful_sets, stateful_sets_feed) =
            ChannelWatchSource::new(ResourceKind::StatefulSet);
        let (replica_sets, replica_sets_feed) = ChannelWatchSource::new(ResourceKind::ReplicaSet);

        let provider = Self {
            pods: Mutex::new(Some(pods)),
            namespaces: Mutex::new(Some(namespaces)),
            nodes: Mutex::new(Some(nodes)),
            deployments: Mutex::new(Some(deployments)),
            stateful_sets: Mutex::new(Some(stateful_sets)),
            replica_sets: Mutex::new(Some(replica_sets)),
            requested: Mutex::new(HashSet::new()),
            namespace_scope: Mutex::new(None),
        };
        let feeds = ChannelFeeds {
            pods: pods_feed,
            namespaces: namespaces_feed,
            nodes: nodes_feed,
            deployments: deployments_feed,
            stateful_sets: stateful_sets_feed,
            replica_sets: replica_sets_feed,
        };
        (provider, feeds)
    }

    pub fn was_requested(&self, kind: ResourceKind) -> bool {
        self.requested.lock().contains(&kind)
    }

    pub fn namespace_scope(&self) -> Option<NamespaceScope> {
        self.namespace_scope.lock().clone()
    }

    fn take<K>(
        &self,
        kind: ResourceKind,
        slot: &Mutex<Option<ChannelWatchSource<K>>>,
    ) -> Result<Box<dyn WatchSource<K>>>
    where
        K: Resource + Clone + Send + Sync + 'static,
    {
        let source = slot
            .lock()
            .take()
            .ok_or(Error::SourceUnavailable(kind.as_str()))?;
        self.requested.lock().insert(kind);
        Ok(Box::new(source))
    }
}

impl SourceProvider for ChannelSourceProvider {
    fn pods(&self, _scope: &PodScope) -> Result<Box<dyn WatchSource<Pod>>> {
        self.take(ResourceKind::Pod, &self.pods)
    }

    fn namespaces(&self, scope: &NamespaceScope) -> Result<Box<dyn WatchSource<Namespace>>> {
        let source = self.take(ResourceKind::Namespace, &self.namespaces)?;
        *self.namespace_scope.lock() = Some(scope.clone());
        Ok(source)
    }

    fn nodes(&self, _node: Option<&str>) -> Result<Box<dyn WatchSource<Node>>> {
        self.take(ResourceKind::Node, &self.nodes)
    }

    fn deployments(&self, _namespace: Option<&str>) -> Result<Box<dyn WatchSource<Deployment>>> {
        self.take(ResourceKind::Deployment, &self.deployments)
    }

    fn stateful_sets(
        &self,
        _namespace: Option<&str>,
    ) -> Result<Box<dyn WatchSource<StatefulSet>>> {
        self.take(ResourceKind::StatefulSet, &self.stateful_sets)
    }

    fn replica_sets(&self, _namespace: Option<&str>) -> Result<Box<dyn WatchSource<ReplicaSet>>> {
        self.take(ResourceKind::ReplicaSet, &self.replica_sets)
    }
}
