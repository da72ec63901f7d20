//! Extraction rules: which attributes the cache derives from watched objects

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Kind of object a label or annotation rule reads from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataFrom {
    #[default]
    Pod,
    Namespace,
    Node,
    Deployment,
    StatefulSet,
}

impl MetadataFrom {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetadataFrom::Pod => "pod",
            MetadataFrom::Namespace => "namespace",
            MetadataFrom::Node => "node",
            MetadataFrom::Deployment => "deployment",
            MetadataFrom::StatefulSet => "statefulset",
        }
    }
}

/// Attribute name patterns used for key-regex rules without a tag name
pub mod patterns {
    pub const POD_LABELS: &str = "k8s.pod.labels.";
    pub const POD_ANNOTATIONS: &str = "k8s.pod.annotations.";
    pub const NODE_LABELS: &str = "k8s.node.labels.";
    pub const NODE_ANNOTATIONS: &str = "k8s.node.annotations.";
    pub const NAMESPACE_LABELS: &str = "k8s.namespace.labels.";
    pub const NAMESPACE_ANNOTATIONS: &str = "k8s.namespace.annotations.";
    pub const DEPLOYMENT_LABEL: &str = "k8s.deployment.label.";
    pub const DEPLOYMENT_ANNOTATION: &str = "k8s.deployment.annotation.";
    pub const STATEFULSET_LABEL: &str = "k8s.statefulset.label.";
    pub const STATEFULSET_ANNOTATION: &str = "k8s.statefulset.annotation.";
}

/// Copies one label or annotation (or every key matching a pattern) into the
/// attribute map of the object it applies to.
#[derive(Debug, Clone)]
pub struct FieldExtractionRule {
    /// Attribute name; may contain `$1`-style references when `key_regex` is set
    pub name: String,
    pub key: String,
    pub key_regex: Option<Regex>,
    pub has_key_regex_reference: bool,
    pub from: MetadataFrom,
}

impl FieldExtractionRule {
    /// Apply the rule if it targets `from`. `prefix` names the attribute for
    /// key-regex rules that have no explicit tag name.
    pub fn extract(
        &self,
        from: MetadataFrom,
        metadata: Option<&BTreeMap<String, String>>,
        tags: &mut HashMap<String, String>,
        prefix: &str,
    ) {
        if self.from != from {
            return;
        }
        let Some(metadata) = metadata else {
            return;
        };

        match &self.key_regex {
            Some(re) => {
                for (key, value) in metadata {
                    if value.is_empty() {
                        continue;
                    }
                    let Some(captures) = re.captures(key) else {
                        continue;
                    };
                    let name = if self.has_key_regex_reference {
                        let mut expanded = String::new();
                        captures.expand(&self.name, &mut expanded);
                        expanded
                    } else {
                        format!("{prefix}{key}")
                    };
                    tags.insert(name, value.clone());
                }
            }
            None => {
                if let Some(value) = metadata.get(&self.key) {
                    tags.insert(self.name.clone(), value.clone());
                }
            }
        }
    }
}

/// Toggles for the attributes derived from pods and their owners, plus the
/// label and annotation rules for every object kind.
#[derive(Debug, Clone, Default)]
pub struct ExtractionRules {
    pub cluster_uid: bool,
    pub container_id: bool,
    pub container_image_name: bool,
    pub container_image_repo_digests: bool,
    pub container_image_tag: bool,
    pub container_name: bool,
    pub cronjob_name: bool,
    pub daemonset_name: bool,
    pub daemonset_uid: bool,
    pub deployment_name: bool,
    pub deployment_uid: bool,
    pub job_name: bool,
    pub job_uid: bool,
    pub namespace: bool,
    pub node: bool,
    pub node_uid: bool,
    pub pod_hostname: bool,
    pub pod_ip: bool,
    pub pod_name: bool,
    pub pod_uid: bool,
    pub replicaset_id: bool,
    pub replicaset_name: bool,
    pub service_instance_id: bool,
    pub service_name: bool,
    pub service_version: bool,
    pub start_time: bool,
    pub statefulset_name: bool,
    pub statefulset_uid: bool,

    pub labels: Vec<FieldExtractionRule>,
    pub annotations: Vec<FieldExtractionRule>,
}

impl ExtractionRules {
    /// Turn on extraction of the named attribute.
    pub fn enable(&mut self, name: &str) -> Result<()> {
        let flag = match name {
            "k8s.cluster.uid" => &mut self.cluster_uid,
            "container.id" => &mut self.container_id,
            "container.image.name" => &mut self.container_image_name,
            "container.image.repo_digests" => &mut self.container_image_repo_digests,
            "container.image.tag" => &mut self.container_image_tag,
            "k8s.container.name" => &mut self.container_name,
            "k8s.cronjob.name" => &mut self.cronjob_name,
            "k8s.daemonset.name" => &mut self.daemonset_name,
            "k8s.daemonset.uid" => &mut self.daemonset_uid,
            "k8s.deployment.name" => &mut self.deployment_name,
            "k8s.deployment.uid" => &mut self.deployment_uid,
            "k8s.job.name" => &mut self.job_name,
            "k8s.job.uid" => &mut self.job_uid,
            "k8s.namespace.name" => &mut self.namespace,
            "k8s.node.name" => &mut self.node,
            "k8s.node.uid" => &mut self.node_uid,
            "k8s.pod.hostname" => &mut self.pod_hostname,
            "k8s.pod.ip" => &mut self.pod_ip,
            "k8s.pod.name" => &mut self.pod_name,
            "k8s.pod.uid" => &mut self.pod_uid,
            "k8s.replicaset.uid" => &mut self.replicaset_id,
            "k8s.replicaset.name" => &mut self.replicaset_name,
            "service.instance.id" => &mut self.service_instance_id,
            "service.name" => &mut self.service_name,
            "service.version" => &mut self.service_version,
            "k8s.pod.start_time" => &mut self.start_time,
            "k8s.statefulset.name" => &mut self.statefulset_name,
            "k8s.statefulset.uid" => &mut self.statefulset_uid,
            other => {
                return Err(Error::ConfigError(format!(
                    "unknown metadata attribute {other:?}"
                )))
            }
        };
        *flag = true;
        Ok(())
    }

    pub fn needs_container_attributes(&self) -> bool {
        self.container_image_name
            || self.container_name
            || self.container_image_tag
            || self.container_image_repo_digests
            || self.container_id
            || self.service_version
            || self.service_instance_id
    }

    /// Whether any attribute depends on the pod's owner references
    pub fn includes_owner_metadata(&self) -> bool {
        self.replicaset_id
            || self.replicaset_name
            || self.daemonset_uid
            || self.daemonset_name
            || self.job_uid
            || self.job_name
            || self.statefulset_uid
            || self.statefulset_name
            || self.deployment_name
            || self.deployment_uid
            || self.cronjob_name
            || self.service_name
    }

    /// Whether the replicaset→deployment cross reference is needed
    pub fn needs_replica_sets(&self) -> bool {
        self.deployment_name || self.deployment_uid
    }

    /// Whether pod labels are read, by a label rule or for `service.*`
    pub fn needs_pod_labels(&self) -> bool {
        self.service_name
            || self.service_version
            || self.labels.iter().any(|r| r.from == MetadataFrom::Pod)
    }

    /// Whether any label or annotation rule reads from `from`
    pub fn targets(&self, from: MetadataFrom) -> bool {
        self.labels
            .iter()
            .chain(self.annotations.iter())
            .any(|r| r.from == from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_key_rule() {
        let rule = FieldExtractionRule {
            name: "app".to_string(),
            key: "app.kubernetes.io/name".to_string(),
            key_regex: None,
            has_key_regex_reference: false,
            from: MetadataFrom::Pod,
        };
        let labels = metadata(&[("app.kubernetes.io/name", "web"), ("tier", "front")]);
        let mut tags = HashMap::new();

        rule.extract(MetadataFrom::Pod, Some(&labels), &mut tags, patterns::POD_LABELS);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["app"], "web");

        tags.clear();
        rule.extract(MetadataFrom::Node, Some(&labels), &mut tags, patterns::NODE_LABELS);
        assert!(tags.is_empty());
    }

    #[test]
    fn test_key_regex_rule_with_reference() {
        let rule = FieldExtractionRule {
            name: "team.$1".to_string(),
            key: String::new(),
            key_regex: Some(Regex::new("^(?:team/(.*))$").unwrap()),
            has_key_regex_reference: true,
            from: MetadataFrom::Namespace,
        };
        let labels = metadata(&[("team/owner", "infra"), ("team/empty", ""), ("other", "x")]);
        let mut tags = HashMap::new();

        rule.extract(
            MetadataFrom::Namespace,
            Some(&labels),
            &mut tags,
            patterns::NAMESPACE_LABELS,
        );
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["team.owner"], "infra");
    }

    #[test]
    fn test_key_regex_rule_uses_prefix() {
        let rule = FieldExtractionRule {
            name: String::new(),
            key: String::new(),
            key_regex: Some(Regex::new("^(?:owner.*)$").unwrap()),
            has_key_regex_reference: false,
            from: MetadataFrom::Deployment,
        };
        let annotations = metadata(&[("owner", "a"), ("owner-email", "b"), ("not-owner", "c")]);
        let mut tags = HashMap::new();

        rule.extract(
            MetadataFrom::Deployment,
            Some(&annotations),
            &mut tags,
            patterns::DEPLOYMENT_ANNOTATION,
        );
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["k8s.deployment.annotation.owner"], "a");
        assert_eq!(tags["k8s.deployment.annotation.owner-email"], "b");
    }

    #[test]
    fn test_targets() {
        let mut rules = ExtractionRules::default();
        assert!(!rules.targets(MetadataFrom::Node));

        rules.annotations.push(FieldExtractionRule {
            name: "n".to_string(),
            key: "k".to_string(),
            key_regex: None,
            has_key_regex_reference: false,
            from: MetadataFrom::Node,
        });
        assert!(rules.targets(MetadataFrom::Node));
        assert!(!rules.targets(MetadataFrom::StatefulSet));
    }
}
