//! Watch transforms that strip objects down to the fields extraction reads
//!
//! Applied to every object before it reaches the event handlers, so the
//! watcher's own bookkeeping never holds full pod specs.

use super::rules::ExtractionRules;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

pub fn trim_pod(pod: Pod, rules: &ExtractionRules) -> Pod {
    let meta = pod.metadata;
    let spec = pod.spec.unwrap_or_default();
    let status = pod.status.unwrap_or_default();

    let trimmed_meta = ObjectMeta {
        name: meta.name,
        namespace: meta.namespace,
        uid: meta.uid,
        resource_version: meta.resource_version,
        creation_timestamp: meta.creation_timestamp,
        labels: if rules.needs_pod_labels() {
            meta.labels
        } else {
            None
        },
        annotations: meta.annotations,
        owner_references: meta.owner_references.map(|refs| {
            refs.into_iter()
                .map(|o| OwnerReference {
                    api_version: o.api_version,
                    kind: o.kind,
                    name: o.name,
                    uid: o.uid,
                    controller: o.controller,
                    ..Default::default()
                })
                .collect()
        }),
        ..Default::default()
    };

    let keep_specs = rules.container_image_name
        || rules.container_image_tag
        || rules.service_version
        || rules.service_instance_id;
    let trim_container = |c: Container| Container {
        name: c.name,
        image: c.image,
        ..Default::default()
    };

    let trimmed_spec = PodSpec {
        node_name: spec.node_name,
        hostname: spec.hostname,
        host_network: spec.host_network,
        containers: if keep_specs {
            spec.containers.into_iter().map(trim_container).collect()
        } else {
            Vec::new()
        },
        init_containers: if keep_specs {
            spec.init_containers
                .map(|cs| cs.into_iter().map(trim_container).collect())
        } else {
            None
        },
        ..Default::default()
    };

    let keep_statuses = rules.needs_container_attributes();
    let trim_status = |s: ContainerStatus| ContainerStatus {
        name: s.name,
        container_id: s.container_id,
        image_id: s.image_id,
        restart_count: s.restart_count,
        ..Default::default()
    };

    let trimmed_status = PodStatus {
        pod_ip: status.pod_ip,
        start_time: status.start_time,
        container_statuses: if keep_statuses {
            status
                .container_statuses
                .map(|cs| cs.into_iter().map(trim_status).collect())
        } else {
            None
        },
        init_container_statuses: if keep_statuses {
            status
                .init_container_statuses
                .map(|cs| cs.into_iter().map(trim_status).collect())
        } else {
            None
        },
        ..Default::default()
    };

    Pod {
        metadata: trimmed_meta,
        spec: Some(trimmed_spec),
        status: Some(trimmed_status),
    }
}

/// Replicasets are only needed for their identity and owning deployment
pub fn trim_replica_set(replica_set: ReplicaSet) -> ReplicaSet {
    let meta = replica_set.metadata;
    ReplicaSet {
        metadata: ObjectMeta {
            name: meta.name,
            namespace: meta.namespace,
            uid: meta.uid,
            resource_version: meta.resource_version,
            owner_references: meta.owner_references,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::rules::{FieldExtractionRule, MetadataFrom};
    use k8s_openapi::api::apps::v1::ReplicaSetSpec;
    use std::collections::BTreeMap;

    fn full_pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-1".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("u1".to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                finalizers: Some(vec!["example.com/keep".to_string()]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-a".to_string()),
                service_account_name: Some("default".to_string()),
                containers: vec![Container {
                    name: "app".to_string(),
                    image: Some("nginx:1.25".to_string()),
                    command: Some(vec!["nginx".to_string()]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                pod_ip: Some("10.0.0.5".to_string()),
                phase: Some("Running".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "app".to_string(),
                    container_id: Some("containerd://c1".to_string()),
                    ready: true,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_trim_pod_keeps_extraction_fields() {
        let mut rules = ExtractionRules::default();
        rules.container_image_name = true;
        let pod = trim_pod(full_pod(), &rules);

        assert_eq!(pod.metadata.name.as_deref(), Some("web-1"));
        assert!(pod.metadata.finalizers.is_none());

        let spec = pod.spec.unwrap();
        assert_eq!(spec.node_name.as_deref(), Some("node-a"));
        assert!(spec.service_account_name.is_none());
        assert_eq!(spec.containers[0].image.as_deref(), Some("nginx:1.25"));
        assert!(spec.containers[0].command.is_none());

        let status = pod.status.unwrap();
        assert_eq!(status.pod_ip.as_deref(), Some("10.0.0.5"));
        assert!(status.phase.is_none());
        assert!(!status.container_statuses.unwrap()[0].ready);
    }

    #[test]
    fn test_trim_pod_drops_containers_when_unused() {
        let pod = trim_pod(full_pod(), &ExtractionRules::default());
        assert!(pod.spec.unwrap().containers.is_empty());
        assert!(pod.status.unwrap().container_statuses.is_none());
    }

    #[test]
    fn test_trim_pod_keeps_labels_only_when_read() {
        let pod = trim_pod(full_pod(), &ExtractionRules::default());
        assert!(pod.metadata.labels.is_none());

        let mut rules = ExtractionRules::default();
        rules.service_name = true;
        assert!(trim_pod(full_pod(), &rules).metadata.labels.is_some());

        let mut rules = ExtractionRules::default();
        rules.labels.push(FieldExtractionRule {
            name: "app".to_string(),
            key: "app".to_string(),
            key_regex: None,
            has_key_regex_reference: false,
            from: MetadataFrom::Pod,
        });
        assert!(trim_pod(full_pod(), &rules).metadata.labels.is_some());

        rules.labels[0].from = MetadataFrom::Namespace;
        assert!(trim_pod(full_pod(), &rules).metadata.labels.is_none());
    }

    #[test]
    fn test_trim_replica_set() {
        let rs = ReplicaSet {
            metadata: ObjectMeta {
                name: Some("web-7c9f".to_string()),
                uid: Some("rs-1".to_string()),
                ..Default::default()
            },
            spec: Some(ReplicaSetSpec {
                replicas: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };

        let rs = trim_replica_set(rs);
        assert_eq!(rs.metadata.uid.as_deref(), Some("rs-1"));
        assert!(rs.spec.is_none());
    }
}
