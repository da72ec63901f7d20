//! Per-kind object stores
//!
//! These maps carry no lock of their own: they live next to the pod table
//! inside the cache's single lock domain, so a pod record is always built from
//! one consistent view of replicasets, statefulsets and namespaces.

use crate::k8s::types::{
    DeploymentRecord, NamespaceRecord, NodeRecord, ReplicaSetRecord, StatefulSetRecord,
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ObjectStores {
    /// Keyed by namespace name
    pub namespaces: HashMap<String, Arc<NamespaceRecord>>,
    /// Keyed by node name
    pub nodes: HashMap<String, Arc<NodeRecord>>,
    /// Keyed by deployment UID
    pub deployments: HashMap<String, Arc<DeploymentRecord>>,
    /// Keyed by statefulset UID
    pub stateful_sets: HashMap<String, Arc<StatefulSetRecord>>,
    /// Keyed by replicaset UID
    pub replica_sets: HashMap<String, Arc<ReplicaSetRecord>>,
}

impl ObjectStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(&self, name: &str) -> Option<&Arc<NamespaceRecord>> {
        self.namespaces.get(name)
    }

    pub fn replica_set(&self, uid: &str) -> Option<&Arc<ReplicaSetRecord>> {
        if uid.is_empty() {
            return None;
        }
        self.replica_sets.get(uid)
    }

    pub fn stateful_set(&self, uid: &str) -> Option<&Arc<StatefulSetRecord>> {
        if uid.is_empty() {
            return None;
        }
        self.stateful_sets.get(uid)
    }

    pub fn put_namespace(&mut self, record: NamespaceRecord) {
        self.namespaces
            .insert(record.name.clone(), Arc::new(record));
    }

    pub fn put_node(&mut self, record: NodeRecord) {
        self.nodes.insert(record.name.clone(), Arc::new(record));
    }

    pub fn put_deployment(&mut self, record: DeploymentRecord) {
        self.deployments
            .insert(record.uid.clone(), Arc::new(record));
    }

    pub fn put_stateful_set(&mut self, record: StatefulSetRecord) {
        self.stateful_sets
            .insert(record.uid.clone(), Arc::new(record));
    }

    pub fn put_replica_set(&mut self, record: ReplicaSetRecord) {
        self.replica_sets
            .insert(record.uid.clone(), Arc::new(record));
    }
}
