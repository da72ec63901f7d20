//! Watch event handlers writing into the shared cache state

use super::eviction::DeleteRequest;
use super::CacheState;
use crate::extract::replica_set_record;
use crate::k8s::types::ResourceKind;
use crate::k8s::watcher::{ResourceEventHandler, Tombstone};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::ResourceExt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error};

impl CacheState {
    fn add_or_update_pod(&self, pod: &Pod) {
        if pod.metadata.name.as_deref().unwrap_or_default().is_empty() {
            error!("Dropping pod event without a name");
            return;
        }

        let record = {
            let tables = self.tables.read();
            Arc::new(self.extractor.pod_record(pod, &tables.stores))
        };
        let ids = self.resolver.identifiers(&record);

        let mut tables = self.tables.write();
        tables.pods.put(&ids, record);
        self.metrics.set_pod_table_size(tables.pods.len());
    }

    /// Queue every identifier still pointing at this pod for delayed removal
    fn forget_pod(&self, pod: &Pod) {
        let (name, pending) = {
            let tables = self.tables.read();
            let record = self.extractor.pod_record(pod, &tables.stores);
            let pending: Vec<_> = self
                .resolver
                .identifiers(&record)
                .into_iter()
                .filter(|id| {
                    tables
                        .pods
                        .get_raw(id)
                        .is_some_and(|stored| stored.name == record.name)
                })
                .collect();
            (record.name, pending)
        };

        if pending.is_empty() {
            return;
        }
        debug!("Queueing {} identifiers of pod {} for eviction", pending.len(), name);

        let ts = Instant::now();
        let mut deletes = self.deletes.lock();
        for id in pending {
            deletes.push(DeleteRequest {
                id,
                pod_name: name.clone(),
                ts,
            });
        }
    }
}

impl ResourceEventHandler<Pod> for CacheState {
    fn on_add(&self, pod: &Pod) {
        self.metrics.record_add(ResourceKind::Pod);
        self.add_or_update_pod(pod);
    }

    fn on_update(&self, _old: &Pod, new: &Pod) {
        self.metrics.record_update(ResourceKind::Pod);
        self.add_or_update_pod(new);
    }

    fn on_delete(&self, tombstone: &Tombstone<Pod>) {
        self.metrics.record_delete(ResourceKind::Pod);
        self.forget_pod(tombstone.object());
    }
}

impl ResourceEventHandler<Namespace> for CacheState {
    fn on_add(&self, namespace: &Namespace) {
        self.metrics.record_add(ResourceKind::Namespace);
        self.put_namespace(namespace);
    }

    fn on_update(&self, _old: &Namespace, new: &Namespace) {
        self.metrics.record_update(ResourceKind::Namespace);
        self.put_namespace(new);
    }

    fn on_delete(&self, tombstone: &Tombstone<Namespace>) {
        self.metrics.record_delete(ResourceKind::Namespace);
        let name = tombstone.object().name_any();
        self.tables.write().stores.namespaces.remove(&name);
    }
}

impl ResourceEventHandler<Node> for CacheState {
    fn on_add(&self, node: &Node) {
        self.metrics.record_add(ResourceKind::Node);
        self.put_node(node);
    }

    fn on_update(&self, _old: &Node, new: &Node) {
        self.metrics.record_update(ResourceKind::Node);
        self.put_node(new);
    }

    fn on_delete(&self, tombstone: &Tombstone<Node>) {
        self.metrics.record_delete(ResourceKind::Node);
        let name = tombstone.object().name_any();
        self.tables.write().stores.nodes.remove(&name);
    }
}

impl ResourceEventHandler<Deployment> for CacheState {
    fn on_add(&self, deployment: &Deployment) {
        self.metrics.record_add(ResourceKind::Deployment);
        self.put_deployment(deployment);
    }

    fn on_update(&self, _old: &Deployment, new: &Deployment) {
        self.metrics.record_update(ResourceKind::Deployment);
        self.put_deployment(new);
    }

    fn on_delete(&self, tombstone: &Tombstone<Deployment>) {
        self.metrics.record_delete(ResourceKind::Deployment);
        if let Some(uid) = tombstone.object().uid() {
            self.tables.write().stores.deployments.remove(&uid);
        }
    }
}

impl ResourceEventHandler<StatefulSet> for CacheState {
    fn on_add(&self, stateful_set: &StatefulSet) {
        self.metrics.record_add(ResourceKind::StatefulSet);
        self.put_stateful_set(stateful_set);
    }

    fn on_update(&self, _old: &StatefulSet, new: &StatefulSet) {
        self.metrics.record_update(ResourceKind::StatefulSet);
        self.put_stateful_set(new);
    }

    fn on_delete(&self, tombstone: &Tombstone<StatefulSet>) {
        self.metrics.record_delete(ResourceKind::StatefulSet);
        if let Some(uid) = tombstone.object().uid() {
            self.tables.write().stores.stateful_sets.remove(&uid);
        }
    }
}

impl ResourceEventHandler<ReplicaSet> for CacheState {
    fn on_add(&self, replica_set: &ReplicaSet) {
        self.metrics.record_add(ResourceKind::ReplicaSet);
        self.put_replica_set(replica_set);
    }

    fn on_update(&self, _old: &ReplicaSet, new: &ReplicaSet) {
        self.metrics.record_update(ResourceKind::ReplicaSet);
        self.put_replica_set(new);
    }

    fn on_delete(&self, tombstone: &Tombstone<ReplicaSet>) {
        self.metrics.record_delete(ResourceKind::ReplicaSet);
        if let Some(uid) = tombstone.object().uid() {
            self.tables.write().stores.replica_sets.remove(&uid);
        }
    }
}

impl CacheState {
    fn put_namespace(&self, namespace: &Namespace) {
        let record = self.extractor.namespace_record(namespace);
        if record.name.is_empty() {
            error!("Dropping namespace event without a name");
            return;
        }
        self.tables.write().stores.put_namespace(record);
    }

    fn put_node(&self, node: &Node) {
        let record = self.extractor.node_record(node);
        if record.name.is_empty() {
            error!("Dropping node event without a name");
            return;
        }
        self.tables.write().stores.put_node(record);
    }

    fn put_deployment(&self, deployment: &Deployment) {
        let record = self.extractor.deployment_record(deployment);
        if record.uid.is_empty() {
            error!("Dropping deployment {} without a uid", record.name);
            return;
        }
        self.tables.write().stores.put_deployment(record);
    }

    fn put_stateful_set(&self, stateful_set: &StatefulSet) {
        let record = self.extractor.stateful_set_record(stateful_set);
        if record.uid.is_empty() {
            error!("Dropping statefulset {} without a uid", record.name);
            return;
        }
        self.tables.write().stores.put_stateful_set(record);
    }

    fn put_replica_set(&self, replica_set: &ReplicaSet) {
        let record = replica_set_record(replica_set);
        if record.uid.is_empty() {
            error!("Dropping replicaset {} without a uid", record.name);
            return;
        }
        self.tables.write().stores.put_replica_set(record);
    }
}
