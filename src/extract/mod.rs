//! Attribute extraction from watched objects
//!
//! Turns Kubernetes API objects into the trimmed records stored by the cache.
//! Failures on individual attributes are logged and the attribute is left
//! out; they never fail the surrounding watch event.

pub mod image;
pub mod rules;
pub mod trim;

use crate::cache::stores::ObjectStores;
use crate::config::Excludes;
use crate::k8s::types::{
    Container, ContainerStatus, DeploymentRecord, DeploymentRef, NamespaceRecord, NodeRecord,
    PodContainers, PodRecord, ReplicaSetRecord, StatefulSetRecord,
};
use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use image::{canonical_image_ref, ImageRef};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kubemeta_common::attributes as attr;
use rules::{patterns, ExtractionRules, MetadataFrom};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pods carrying this annotation with value `true` are hidden from lookups
pub const IGNORE_ANNOTATION: &str = "opentelemetry.io/k8s-processor/ignore";

const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";
const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
const APP_INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
const APP_VERSION_LABEL: &str = "app.kubernetes.io/version";

/// Builds cache records according to the configured extraction rules
#[derive(Debug, Clone)]
pub struct Extractor {
    rules: ExtractionRules,
    excludes: Excludes,
}

impl Extractor {
    pub fn new(rules: ExtractionRules, excludes: Excludes) -> Self {
        Self { rules, excludes }
    }

    /// Build the record for `pod`, resolving owners through `stores`.
    pub fn pod_record(&self, pod: &Pod, stores: &ObjectStores) -> PodRecord {
        let meta = &pod.metadata;
        let spec = pod.spec.as_ref();
        let status = pod.status.as_ref();

        let deployment_uid = stores
            .replica_set(owner_uid(meta, "ReplicaSet"))
            .map(|rs| rs.deployment.uid.clone())
            .unwrap_or_default();
        let statefulset_uid = stores
            .stateful_set(owner_uid(meta, "StatefulSet"))
            .map(|ss| ss.uid.clone())
            .unwrap_or_default();

        let mut record = PodRecord {
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            uid: meta.uid.clone().unwrap_or_default(),
            node_name: spec.and_then(|s| s.node_name.clone()).unwrap_or_default(),
            address: status.and_then(|s| s.pod_ip.clone()).unwrap_or_default(),
            host_network: spec.and_then(|s| s.host_network).unwrap_or(false),
            start_time: status.and_then(|s| s.start_time.as_ref()).map(|t| t.0),
            deployment_uid,
            statefulset_uid,
            ..Default::default()
        };

        if self.should_ignore(pod) {
            record.ignore = true;
        } else {
            record.attributes = self.pod_attributes(pod, stores);
            record.containers = self.pod_containers(pod);
        }

        record
    }

    pub fn should_ignore(&self, pod: &Pod) -> bool {
        let annotated = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(IGNORE_ANNOTATION))
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if annotated {
            return true;
        }

        let name = pod.metadata.name.as_deref().unwrap_or_default();
        self.excludes.matches(name)
    }

    pub fn pod_attributes(&self, pod: &Pod, stores: &ObjectStores) -> HashMap<String, String> {
        let rules = &self.rules;
        let meta = &pod.metadata;
        let spec = pod.spec.as_ref();
        let name = meta.name.clone().unwrap_or_default();
        let mut tags = HashMap::new();

        if rules.pod_name {
            tags.insert(attr::K8S_POD_NAME.to_string(), name.clone());
        }
        if rules.service_name {
            tags.insert(attr::SERVICE_NAME.to_string(), name.clone());
        }
        if rules.pod_hostname {
            let hostname = spec.and_then(|s| s.hostname.clone()).unwrap_or_default();
            tags.insert(attr::K8S_POD_HOSTNAME.to_string(), hostname);
        }
        if rules.pod_ip {
            let ip = pod
                .status
                .as_ref()
                .and_then(|s| s.pod_ip.clone())
                .unwrap_or_default();
            tags.insert(attr::K8S_POD_IP.to_string(), ip);
        }
        if rules.namespace {
            tags.insert(
                attr::K8S_NAMESPACE_NAME.to_string(),
                meta.namespace.clone().unwrap_or_default(),
            );
        }
        if rules.start_time {
            if let Some(created) = &meta.creation_timestamp {
                match format_timestamp(&created.0) {
                    Ok(ts) => {
                        tags.insert(attr::K8S_POD_START_TIME.to_string(), ts);
                    }
                    Err(e) => warn!("Failed to format creation timestamp of pod {}: {}", name, e),
                }
            }
        }
        if rules.pod_uid {
            tags.insert(
                attr::K8S_POD_UID.to_string(),
                meta.uid.clone().unwrap_or_default(),
            );
        }

        if rules.includes_owner_metadata() {
            self.owner_attributes(meta, stores, &mut tags);
        }

        if rules.node {
            let node = spec.and_then(|s| s.node_name.clone()).unwrap_or_default();
            tags.insert(attr::K8S_NODE_NAME.to_string(), node);
        }

        if rules.cluster_uid {
            match stores.namespace(KUBE_SYSTEM_NAMESPACE) {
                Some(ns) => {
                    tags.insert(attr::K8S_CLUSTER_UID.to_string(), ns.uid.clone());
                }
                None => debug!("kube-system namespace not cached, cluster uid unavailable"),
            }
        }

        for rule in &rules.labels {
            rule.extract(
                MetadataFrom::Pod,
                meta.labels.as_ref(),
                &mut tags,
                patterns::POD_LABELS,
            );
        }

        if rules.service_name {
            // instance takes precedence over name
            copy_label(meta, &mut tags, APP_NAME_LABEL, attr::SERVICE_NAME);
            copy_label(meta, &mut tags, APP_INSTANCE_LABEL, attr::SERVICE_NAME);
        }
        if rules.service_version {
            copy_label(meta, &mut tags, APP_VERSION_LABEL, attr::SERVICE_VERSION);
        }

        for rule in &rules.annotations {
            rule.extract(
                MetadataFrom::Pod,
                meta.annotations.as_ref(),
                &mut tags,
                patterns::POD_ANNOTATIONS,
            );
        }

        tags
    }

    fn owner_attributes(
        &self,
        meta: &ObjectMeta,
        stores: &ObjectStores,
        tags: &mut HashMap<String, String>,
    ) {
        let rules = &self.rules;
        let mut set = |enabled: bool, key: &str, value: &str| {
            if enabled {
                tags.insert(key.to_string(), value.to_string());
            }
        };

        for owner in meta.owner_references.iter().flatten() {
            match owner.kind.as_str() {
                "ReplicaSet" => {
                    set(rules.replicaset_id, attr::K8S_REPLICASET_UID, &owner.uid);
                    set(rules.replicaset_name, attr::K8S_REPLICASET_NAME, &owner.name);
                    set(rules.service_name, attr::SERVICE_NAME, &owner.name);

                    let deployment = stores
                        .replica_set(&owner.uid)
                        .map(|rs| rs.deployment.clone())
                        .filter(|d| !d.name.is_empty());
                    if let Some(deployment) = deployment {
                        set(rules.deployment_name, attr::K8S_DEPLOYMENT_NAME, &deployment.name);
                        // deployment name wins over replicaset name
                        set(rules.service_name, attr::SERVICE_NAME, &deployment.name);
                        set(rules.deployment_uid, attr::K8S_DEPLOYMENT_UID, &deployment.uid);
                    }
                }
                "DaemonSet" => {
                    set(rules.daemonset_uid, attr::K8S_DAEMONSET_UID, &owner.uid);
                    set(rules.daemonset_name, attr::K8S_DAEMONSET_NAME, &owner.name);
                    set(rules.service_name, attr::SERVICE_NAME, &owner.name);
                }
                "StatefulSet" => {
                    set(rules.statefulset_uid, attr::K8S_STATEFULSET_UID, &owner.uid);
                    set(rules.statefulset_name, attr::K8S_STATEFULSET_NAME, &owner.name);
                    set(rules.service_name, attr::SERVICE_NAME, &owner.name);
                }
                "Job" => {
                    set(rules.job_uid, attr::K8S_JOB_UID, &owner.uid);
                    set(rules.job_name, attr::K8S_JOB_NAME, &owner.name);
                    set(rules.service_name, attr::SERVICE_NAME, &owner.name);
                    if let Some(cronjob) = cronjob_name(&owner.name) {
                        set(rules.cronjob_name, attr::K8S_CRONJOB_NAME, cronjob);
                        // cronjob name wins over job name
                        set(rules.service_name, attr::SERVICE_NAME, cronjob);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn pod_containers(&self, pod: &Pod) -> PodContainers {
        let rules = &self.rules;
        if !rules.needs_container_attributes() {
            return PodContainers::default();
        }

        let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let mut by_name: HashMap<String, Container> = HashMap::new();

        if rules.container_image_name
            || rules.container_image_tag
            || rules.service_version
            || rules.service_instance_id
        {
            let specs = pod.spec.iter().flat_map(|s| {
                s.containers
                    .iter()
                    .chain(s.init_containers.iter().flatten())
            });
            for spec in specs {
                let mut container = Container::default();
                let image = spec.image.as_deref().unwrap_or_default();
                match ImageRef::parse(image) {
                    Ok(image_ref) => {
                        if rules.container_image_name {
                            container.image_name = image_ref.familiar_name();
                        }
                        if rules.container_image_tag {
                            container.image_tag = image_ref.tag_or_latest().to_string();
                        }
                        if rules.service_version {
                            match image_ref.service_version() {
                                Ok(version) => container.service_version = version,
                                Err(e) => debug!("No service version for {}: {}", image, e),
                            }
                        }
                    }
                    Err(e) => warn!(
                        "Failed to parse image of container {}/{}/{}: {}",
                        namespace, pod_name, spec.name, e
                    ),
                }
                by_name.insert(spec.name.clone(), container);
            }
        }

        let mut ids: Vec<(String, String)> = Vec::new();
        let statuses = pod.status.iter().flat_map(|s| {
            s.container_statuses
                .iter()
                .flatten()
                .chain(s.init_container_statuses.iter().flatten())
        });
        for status in statuses {
            let container = by_name.entry(status.name.clone()).or_default();
            if rules.container_name {
                container.name = status.name.clone();
            }
            if rules.service_instance_id {
                container.service_instance_id =
                    format!("{}.{}.{}", namespace, pod_name, status.name);
            }

            let container_id = strip_runtime_prefix(status.container_id.as_deref().unwrap_or_default());
            if !container_id.is_empty() {
                ids.push((container_id.to_string(), status.name.clone()));
            }

            if rules.container_id || rules.container_image_repo_digests {
                let mut container_status = ContainerStatus::default();
                if rules.container_id {
                    container_status.container_id = container_id.to_string();
                }
                if rules.container_image_repo_digests {
                    match canonical_image_ref(&status.image_id) {
                        Ok(digest) => container_status.image_repo_digest = digest,
                        Err(e) => debug!("No repo digest for {}: {}", status.image_id, e),
                    }
                }
                container
                    .statuses
                    .insert(status.restart_count, container_status);
            }
        }

        let by_name: HashMap<String, Arc<Container>> = by_name
            .into_iter()
            .map(|(name, container)| (name, Arc::new(container)))
            .collect();
        let by_id = ids
            .into_iter()
            .filter_map(|(id, name)| by_name.get(&name).map(|c| (id, Arc::clone(c))))
            .collect();

        PodContainers { by_id, by_name }
    }

    pub fn namespace_record(&self, namespace: &Namespace) -> NamespaceRecord {
        let meta = &namespace.metadata;
        NamespaceRecord {
            name: meta.name.clone().unwrap_or_default(),
            uid: meta.uid.clone().unwrap_or_default(),
            start_time: meta.creation_timestamp.as_ref().map(|t| t.0),
            attributes: self.object_attributes(
                meta,
                MetadataFrom::Namespace,
                patterns::NAMESPACE_LABELS,
                patterns::NAMESPACE_ANNOTATIONS,
            ),
        }
    }

    pub fn node_record(&self, node: &Node) -> NodeRecord {
        let meta = &node.metadata;
        NodeRecord {
            name: meta.name.clone().unwrap_or_default(),
            uid: meta.uid.clone().unwrap_or_default(),
            attributes: self.object_attributes(
                meta,
                MetadataFrom::Node,
                patterns::NODE_LABELS,
                patterns::NODE_ANNOTATIONS,
            ),
        }
    }

    pub fn deployment_record(&self, deployment: &Deployment) -> DeploymentRecord {
        let meta = &deployment.metadata;
        DeploymentRecord {
            name: meta.name.clone().unwrap_or_default(),
            uid: meta.uid.clone().unwrap_or_default(),
            attributes: self.object_attributes(
                meta,
                MetadataFrom::Deployment,
                patterns::DEPLOYMENT_LABEL,
                patterns::DEPLOYMENT_ANNOTATION,
            ),
        }
    }

    pub fn stateful_set_record(&self, stateful_set: &StatefulSet) -> StatefulSetRecord {
        let meta = &stateful_set.metadata;
        StatefulSetRecord {
            name: meta.name.clone().unwrap_or_default(),
            uid: meta.uid.clone().unwrap_or_default(),
            attributes: self.object_attributes(
                meta,
                MetadataFrom::StatefulSet,
                patterns::STATEFULSET_LABEL,
                patterns::STATEFULSET_ANNOTATION,
            ),
        }
    }

    fn object_attributes(
        &self,
        meta: &ObjectMeta,
        from: MetadataFrom,
        label_prefix: &str,
        annotation_prefix: &str,
    ) -> HashMap<String, String> {
        let mut tags = HashMap::new();
        for rule in &self.rules.labels {
            rule.extract(from, meta.labels.as_ref(), &mut tags, label_prefix);
        }
        for rule in &self.rules.annotations {
            rule.extract(from, meta.annotations.as_ref(), &mut tags, annotation_prefix);
        }
        tags
    }
}

/// Cross reference record for a replicaset; the owning deployment comes from
/// its controller owner reference.
pub fn replica_set_record(replica_set: &ReplicaSet) -> ReplicaSetRecord {
    let meta = &replica_set.metadata;
    let deployment = meta
        .owner_references
        .iter()
        .flatten()
        .find(|o| o.kind == "Deployment" && o.controller == Some(true))
        .map(|o| DeploymentRef {
            name: o.name.clone(),
            uid: o.uid.clone(),
        })
        .unwrap_or_default();

    ReplicaSetRecord {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        deployment,
    }
}

fn owner_uid<'a>(meta: &'a ObjectMeta, kind: &str) -> &'a str {
    meta.owner_references
        .iter()
        .flatten()
        .find(|o| o.kind == kind)
        .map(|o| o.uid.as_str())
        .unwrap_or_default()
}

fn copy_label(meta: &ObjectMeta, tags: &mut HashMap<String, String>, label: &str, key: &str) {
    if let Some(value) = meta.labels.as_ref().and_then(|l| l.get(label)) {
        tags.insert(key.to_string(), value.clone());
    }
}

/// CronJob name from a job name of the form `<cronjob>-<digits>`
fn cronjob_name(job_name: &str) -> Option<&str> {
    let (prefix, suffix) = job_name.rsplit_once('-')?;
    if prefix.is_empty() || suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(prefix)
}

/// Drop a `<runtime>://` prefix from a container id
fn strip_runtime_prefix(container_id: &str) -> &str {
    match container_id.split_once("://") {
        Some((_, id)) if !id.contains("://") => id,
        _ => container_id,
    }
}

#[derive(Debug, thiserror::Error)]
#[error("year {0} is outside of the RFC 3339 range")]
pub struct TimestampError(i32);

/// RFC 3339 rendering of a timestamp, rejecting years RFC 3339 cannot express
pub fn format_timestamp(ts: &DateTime<Utc>) -> Result<String, TimestampError> {
    let year = ts.year();
    if !(0..=9999).contains(&year) {
        return Err(TimestampError(year));
    }
    Ok(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use chrono::TimeZone;
    use k8s_openapi::api::core::v1::{
        Container as ContainerSpec, ContainerStatus as ApiContainerStatus, PodSpec, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
    use std::collections::BTreeMap;

    fn extractor(yaml: &str) -> Extractor {
        let options = CacheConfig::from_yaml(yaml).unwrap().compile().unwrap();
        Extractor::new(options.rules, options.excludes)
    }

    fn owner(kind: &str, name: &str, uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
            controller: Some(true),
            ..Default::default()
        }
    }

    fn test_pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-7c9f-abcde".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("u1".to_string()),
                creation_timestamp: Some(Time(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())),
                labels: Some(BTreeMap::from([
                    ("app.kubernetes.io/name".to_string(), "web".to_string()),
                    ("app.kubernetes.io/version".to_string(), "2.1".to_string()),
                ])),
                owner_references: Some(vec![owner("ReplicaSet", "web-7c9f", "rs-1")]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-a".to_string()),
                containers: vec![
                    ContainerSpec {
                        name: "app".to_string(),
                        image: Some("registry.local/team/web:1.4".to_string()),
                        ..Default::default()
                    },
                    ContainerSpec {
                        name: "sidecar".to_string(),
                        image: Some("Not A Valid Image".to_string()),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            status: Some(PodStatus {
                pod_ip: Some("10.0.0.5".to_string()),
                container_statuses: Some(vec![
                    ApiContainerStatus {
                        name: "app".to_string(),
                        container_id: Some("containerd://c1".to_string()),
                        restart_count: 2,
                        ..Default::default()
                    },
                    ApiContainerStatus {
                        name: "sidecar".to_string(),
                        container_id: Some("containerd://c2".to_string()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
        }
    }

    fn stores_with_replica_set() -> ObjectStores {
        let mut stores = ObjectStores::new();
        stores.put_replica_set(ReplicaSetRecord {
            name: "web-7c9f".to_string(),
            namespace: "default".to_string(),
            uid: "rs-1".to_string(),
            deployment: DeploymentRef {
                name: "web".to_string(),
                uid: "dep-1".to_string(),
            },
        });
        stores
    }

    #[test]
    fn test_pod_record_resolves_deployment() {
        let extractor = extractor(
            "extract:\n  metadata: [k8s.pod.name, k8s.deployment.name, k8s.deployment.uid, k8s.replicaset.name, k8s.pod.start_time]\n",
        );
        let record = extractor.pod_record(&test_pod(), &stores_with_replica_set());

        assert_eq!(record.deployment_uid, "dep-1");
        assert_eq!(record.address, "10.0.0.5");
        assert_eq!(record.attributes[attr::K8S_DEPLOYMENT_NAME], "web");
        assert_eq!(record.attributes[attr::K8S_DEPLOYMENT_UID], "dep-1");
        assert_eq!(record.attributes[attr::K8S_REPLICASET_NAME], "web-7c9f");
        assert_eq!(
            record.attributes[attr::K8S_POD_START_TIME],
            "2024-05-01T12:00:00Z"
        );
    }

    #[test]
    fn test_pod_record_without_replica_set_has_no_deployment() {
        let extractor = extractor("extract:\n  metadata: [k8s.pod.name]\n");
        let record = extractor.pod_record(&test_pod(), &ObjectStores::new());

        assert!(record.deployment_uid.is_empty());
        assert!(!record.attributes.contains_key(attr::K8S_DEPLOYMENT_NAME));
    }

    #[test]
    fn test_service_name_precedence() {
        let extractor = extractor("extract:\n  metadata: [service.name, service.version]\n");
        let mut pod = test_pod();
        let record = extractor.pod_record(&pod, &stores_with_replica_set());
        // app.kubernetes.io/name label wins over the deployment name
        assert_eq!(record.attributes[attr::SERVICE_NAME], "web");
        assert_eq!(record.attributes[attr::SERVICE_VERSION], "2.1");

        pod.metadata.labels = None;
        let record = extractor.pod_record(&pod, &stores_with_replica_set());
        assert_eq!(record.attributes[attr::SERVICE_NAME], "web");

        let record = extractor.pod_record(&pod, &ObjectStores::new());
        assert_eq!(record.attributes[attr::SERVICE_NAME], "web-7c9f");
    }

    #[test]
    fn test_cronjob_attributes() {
        let extractor = extractor("extract:\n  metadata: [k8s.job.name, k8s.cronjob.name]\n");
        let mut pod = test_pod();
        pod.metadata.owner_references = Some(vec![owner("Job", "backup-28571234", "job-1")]);

        let record = extractor.pod_record(&pod, &ObjectStores::new());
        assert_eq!(record.attributes[attr::K8S_JOB_NAME], "backup-28571234");
        assert_eq!(record.attributes[attr::K8S_CRONJOB_NAME], "backup");
        assert_eq!(cronjob_name("one-off"), None);
    }

    #[test]
    fn test_cluster_uid_missing_namespace_is_omitted() {
        let extractor = extractor("extract:\n  metadata: [k8s.cluster.uid]\n");
        let record = extractor.pod_record(&test_pod(), &ObjectStores::new());
        assert!(!record.attributes.contains_key(attr::K8S_CLUSTER_UID));

        let mut stores = ObjectStores::new();
        stores.put_namespace(NamespaceRecord {
            name: "kube-system".to_string(),
            uid: "cluster-1".to_string(),
            ..Default::default()
        });
        let record = extractor.pod_record(&test_pod(), &stores);
        assert_eq!(record.attributes[attr::K8S_CLUSTER_UID], "cluster-1");
    }

    #[test]
    fn test_containers_indexed_by_id_and_name() {
        let extractor = extractor(
            "extract:\n  metadata: [container.id, container.image.name, container.image.tag, k8s.container.name, service.instance.id]\n",
        );
        let containers = extractor.pod_containers(&test_pod());

        assert_eq!(containers.by_id.len(), 2);
        assert_eq!(containers.by_name.len(), 2);

        let app = &containers.by_id["c1"];
        assert!(Arc::ptr_eq(app, &containers.by_name["app"]));
        assert_eq!(app.image_name, "registry.local/team/web");
        assert_eq!(app.image_tag, "1.4");
        assert_eq!(app.service_instance_id, "default.web-7c9f-abcde.app");
        assert_eq!(app.statuses[&2].container_id, "c1");

        // unparsable image: attribute omitted, container still indexed
        let sidecar = &containers.by_id["c2"];
        assert!(sidecar.image_name.is_empty());
        assert_eq!(sidecar.name, "sidecar");
    }

    #[test]
    fn test_ignored_pod_has_no_attributes() {
        let extractor = extractor("exclude:\n  pods:\n    - name: ^web-\n");
        let record = extractor.pod_record(&test_pod(), &ObjectStores::new());
        assert!(record.ignore);
        assert!(record.attributes.is_empty());

        let extractor = self::extractor("extract:\n  metadata: [k8s.pod.name]\n");
        let mut pod = test_pod();
        pod.metadata.annotations = Some(BTreeMap::from([(
            IGNORE_ANNOTATION.to_string(),
            " True ".to_string(),
        )]));
        assert!(extractor.should_ignore(&pod));
    }

    #[test]
    fn test_replica_set_record_uses_controller_owner() {
        let mut not_controller = owner("Deployment", "other", "dep-0");
        not_controller.controller = None;
        let rs = ReplicaSet {
            metadata: ObjectMeta {
                name: Some("web-7c9f".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("rs-1".to_string()),
                owner_references: Some(vec![not_controller, owner("Deployment", "web", "dep-1")]),
                ..Default::default()
            },
            ..Default::default()
        };

        let record = replica_set_record(&rs);
        assert_eq!(record.deployment.name, "web");
        assert_eq!(record.deployment.uid, "dep-1");
    }

    #[test]
    fn test_format_timestamp_out_of_range() {
        let ts = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        assert!(format_timestamp(&ts).is_err());
    }
}
