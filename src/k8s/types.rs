use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Object kinds the cache watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pod,
    Namespace,
    Node,
    Deployment,
    StatefulSet,
    ReplicaSet,
}

impl ResourceKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pod",
            ResourceKind::Namespace => "namespace",
            ResourceKind::Node => "node",
            ResourceKind::Deployment => "deployment",
            ResourceKind::StatefulSet => "statefulset",
            ResourceKind::ReplicaSet => "replicaset",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pod metadata as served to callers. Built once per watch event and never
/// mutated afterwards; every identifier of the pod shares the same `Arc`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub node_name: String,
    pub address: String,
    pub host_network: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub deployment_uid: String,
    pub statefulset_uid: String,
    /// Kept in the table for delete bookkeeping but hidden from lookups
    pub ignore: bool,
    pub attributes: HashMap<String, String>,
    pub containers: PodContainers,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PodContainers {
    pub by_id: HashMap<String, Arc<Container>>,
    pub by_name: HashMap<String, Arc<Container>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Container {
    pub name: String,
    pub image_name: String,
    pub image_tag: String,
    pub service_version: String,
    pub service_instance_id: String,
    /// Keyed by restart count
    pub statuses: BTreeMap<i32, ContainerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerStatus {
    pub container_id: String,
    pub image_repo_digest: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NamespaceRecord {
    pub name: String,
    pub uid: String,
    pub start_time: Option<DateTime<Utc>>,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeRecord {
    pub name: String,
    pub uid: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeploymentRecord {
    pub name: String,
    pub uid: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatefulSetRecord {
    pub name: String,
    pub uid: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentRef {
    pub name: String,
    pub uid: String,
}

/// Replicaset → deployment cross reference used while building pod records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicaSetRecord {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub deployment: DeploymentRef,
}
