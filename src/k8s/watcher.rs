//! Watch sources: per-kind event streams feeding the cache's handlers
//!
//! A source delivers the initial listing as adds, flips its sync flag once
//! that listing is complete, and from then on reports adds, updates and
//! deletes as they happen. Both the cluster-backed [`KubeWatchSource`] and the
//! channel-fed replay source translate `kube` watcher events through the same
//! [`EventDispatcher`].

use super::types::ResourceKind;
use async_trait::async_trait;
use futures::StreamExt;
use kube::runtime::watcher::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mutates objects before they reach any handler
pub type Transform<K> = Box<dyn Fn(K) -> K + Send + Sync>;

/// Payload of a delete notification
#[derive(Debug, Clone, PartialEq)]
pub enum Tombstone<K> {
    Known(K),
    /// The delete itself was missed; the object vanished between listings
    FinalStateUnknown { key: String, last_known: K },
}

impl<K> Tombstone<K> {
    pub fn object(&self) -> &K {
        match self {
            Tombstone::Known(obj) => obj,
            Tombstone::FinalStateUnknown { last_known, .. } => last_known,
        }
    }
}

/// Callbacks invoked synchronously for each event of one kind
pub trait ResourceEventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, tombstone: &Tombstone<K>);
}

/// Observes whether a source has delivered its initial listing
#[derive(Debug, Clone)]
pub struct SyncHandle {
    rx: watch::Receiver<bool>,
}

impl SyncHandle {
    pub fn has_synced(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves to `true` once synced, or `false` if the source stopped first.
    pub async fn wait_synced(&self) -> bool {
        let mut rx = self.rx.clone();
        let ok = rx.wait_for(|synced| *synced).await.is_ok();
        ok
    }
}

#[async_trait]
pub trait WatchSource<K>: Send {
    fn kind(&self) -> ResourceKind;

    fn set_transform(&mut self, transform: Transform<K>);

    fn add_event_handler(&mut self, handler: Arc<dyn ResourceEventHandler<K>>) -> SyncHandle;

    /// Deliver events until `stop` is cancelled or the stream ends.
    async fn run(self: Box<Self>, stop: CancellationToken);
}

/// Turns raw watcher events into handler callbacks, tracking the last seen
/// state of every object to tell adds from updates.
pub struct EventDispatcher<K> {
    kind: ResourceKind,
    transform: Option<Transform<K>>,
    handlers: Vec<Arc<dyn ResourceEventHandler<K>>>,
    known: HashMap<String, K>,
    relist: Option<HashSet<String>>,
    synced: watch::Sender<bool>,
}

impl<K: Resource + Clone> EventDispatcher<K> {
    pub fn new(kind: ResourceKind) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            kind,
            transform: None,
            handlers: Vec::new(),
            known: HashMap::new(),
            relist: None,
            synced,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn set_transform(&mut self, transform: Transform<K>) {
        self.transform = Some(transform);
    }

    pub fn add_handler(&mut self, handler: Arc<dyn ResourceEventHandler<K>>) -> SyncHandle {
        self.handlers.push(handler);
        SyncHandle {
            rx: self.synced.subscribe(),
        }
    }

    pub fn dispatch(&mut self, event: Event<K>) {
        match event {
            Event::Init => {
                debug!("{} listing started", self.kind);
                self.relist = Some(HashSet::new());
            }
            Event::InitApply(obj) => {
                let key = self.apply(obj);
                if let Some(relist) = self.relist.as_mut() {
                    relist.insert(key);
                }
            }
            Event::InitDone => {
                if let Some(relist) = self.relist.take() {
                    let stale: Vec<String> = self
                        .known
                        .keys()
                        .filter(|key| !relist.contains(*key))
                        .cloned()
                        .collect();
                    for key in stale {
                        if let Some(last_known) = self.known.remove(&key) {
                            let tombstone = Tombstone::FinalStateUnknown { key, last_known };
                            self.handlers.iter().for_each(|h| h.on_delete(&tombstone));
                        }
                    }
                }
                if !self.synced.send_replace(true) {
                    info!("{} watch synced with {} objects", self.kind, self.known.len());
                }
            }
            Event::Apply(obj) => {
                self.apply(obj);
            }
            Event::Delete(obj) => {
                let obj = self.transformed(obj);
                self.known.remove(&object_key(&obj));
                let tombstone = Tombstone::Known(obj);
                self.handlers.iter().for_each(|h| h.on_delete(&tombstone));
            }
        }
    }

    fn apply(&mut self, obj: K) -> String {
        let obj = self.transformed(obj);
        let key = object_key(&obj);
        match self.known.insert(key.clone(), obj.clone()) {
            Some(old) => self.handlers.iter().for_each(|h| h.on_update(&old, &obj)),
            None => self.handlers.iter().for_each(|h| h.on_add(&obj)),
        }
        key
    }

    fn transformed(&self, obj: K) -> K {
        match &self.transform {
            Some(transform) => transform(obj),
            None => obj,
        }
    }
}

fn object_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}

/// Cluster-backed source built on `kube::runtime::watcher`
pub struct KubeWatchSource<K> {
    api: Api<K>,
    config: watcher::Config,
    dispatcher: EventDispatcher<K>,
}

impl<K: Resource + Clone> KubeWatchSource<K> {
    pub fn new(kind: ResourceKind, api: Api<K>, config: watcher::Config) -> Self {
        Self {
            api,
            config,
            dispatcher: EventDispatcher::new(kind),
        }
    }
}

#[async_trait]
impl<K> WatchSource<K> for KubeWatchSource<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
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
            api,
            config,
            mut dispatcher,
        } = *self;
        let kind = dispatcher.kind();

        info!("Starting {} watcher", kind);

        let mut stream = watcher(api, config).default_backoff().boxed();

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => dispatcher.dispatch(event),
                    Some(Err(e)) => warn!("{} watcher error: {}", kind, e),
                    None => break,
                },
            }
        }

        info!("{} watcher stopped", kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ResourceEventHandler<Namespace> for Recorder {
        fn on_add(&self, obj: &Namespace) {
            self.events.lock().push(format!("add {}", obj.name_any()));
        }

        fn on_update(&self, _old: &Namespace, new: &Namespace) {
            self.events.lock().push(format!("update {}", new.name_any()));
        }

        fn on_delete(&self, tombstone: &Tombstone<Namespace>) {
            let label = match tombstone {
                Tombstone::Known(_) => "delete",
                Tombstone::FinalStateUnknown { .. } => "unknown",
            };
            self.events
                .lock()
                .push(format!("{} {}", label, tombstone.object().name_any()));
        }
    }

    fn ns(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_dispatch_add_update_delete() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = EventDispatcher::new(ResourceKind::Namespace);
        let sync = dispatcher.add_handler(recorder.clone());

        dispatcher.dispatch(Event::Init);
        dispatcher.dispatch(Event::InitApply(ns("a")));
        assert!(!sync.has_synced());
        dispatcher.dispatch(Event::InitDone);
        assert!(sync.has_synced());

        dispatcher.dispatch(Event::Apply(ns("a")));
        dispatcher.dispatch(Event::Apply(ns("b")));
        dispatcher.dispatch(Event::Delete(ns("a")));

        assert_eq!(
            *recorder.events.lock(),
            vec!["add a", "update a", "add b", "delete a"]
        );
    }

    #[test]
    fn test_relist_emits_final_state_unknown() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = EventDispatcher::new(ResourceKind::Namespace);
        dispatcher.add_handler(recorder.clone());

        dispatcher.dispatch(Event::Apply(ns("a")));
        dispatcher.dispatch(Event::Apply(ns("b")));
        dispatcher.dispatch(Event::Init);
        dispatcher.dispatch(Event::InitApply(ns("b")));
        dispatcher.dispatch(Event::InitDone);

        assert_eq!(
            *recorder.events.lock(),
            vec!["add a", "add b", "update b", "unknown a"]
        );
    }

    #[test]
    fn test_transform_applies_before_handlers() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = EventDispatcher::new(ResourceKind::Namespace);
        dispatcher.add_handler(recorder.clone());
        dispatcher.set_transform(Box::new(|mut ns: Namespace| {
            ns.metadata.name = ns.metadata.name.map(|n| n.to_uppercase());
            ns
        }));

        dispatcher.dispatch(Event::Apply(ns("a")));
        assert_eq!(*recorder.events.lock(), vec!["add A"]);
    }

    #[tokio::test]
    async fn test_wait_synced_false_when_source_dropped() {
        let mut dispatcher: EventDispatcher<Namespace> =
            EventDispatcher::new(ResourceKind::Namespace);
        let sync = dispatcher.add_handler(Arc::new(Recorder::default()));
        drop(dispatcher);

        assert!(!sync.wait_synced().await);
    }
}
