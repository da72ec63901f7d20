//! Types shared between the kubemeta cache and its callers
//!
//! This crate defines the pod identifier that telemetry producers derive from
//! their own context, and the attribute names the cache writes. Keeping them
//! here lets a caller build lookup keys without depending on the Kubernetes
//! client stack.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum number of attributes in a single pod identifier
pub const MAX_IDENTIFIER_LEN: usize = 4;

/// Where an identifier attribute value is read from on the telemetry side
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SourceKind {
    /// Peer address of the connection that delivered the telemetry
    #[default]
    Connection,
    /// A resource attribute carried by the telemetry itself
    ResourceAttribute,
}

impl SourceKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Connection => "connection",
            SourceKind::ResourceAttribute => "resource_attribute",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step of an association rule
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AssociationSource {
    pub from: SourceKind,
    /// Resource attribute name; empty for connection sources
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: String,
}

impl AssociationSource {
    pub fn connection() -> Self {
        Self {
            from: SourceKind::Connection,
            name: String::new(),
        }
    }

    pub fn resource_attribute(name: impl Into<String>) -> Self {
        Self {
            from: SourceKind::ResourceAttribute,
            name: name.into(),
        }
    }
}

/// A single (source, value) slot of a pod identifier
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PodIdentifierAttribute {
    pub source: AssociationSource,
    pub value: String,
}

impl PodIdentifierAttribute {
    pub fn from_source(source: &AssociationSource, value: impl Into<String>) -> Self {
        Self {
            source: source.clone(),
            value: value.into(),
        }
    }

    pub fn from_connection(value: impl Into<String>) -> Self {
        Self {
            source: AssociationSource::connection(),
            value: value.into(),
        }
    }

    pub fn from_resource_attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            source: AssociationSource::resource_attribute(name),
            value: value.into(),
        }
    }
}

/// Fixed-size lookup key for the pod table
///
/// Two identifiers are equal when every slot is equal, so the slot order of
/// the association rule that produced an identifier is significant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PodIdentifier([Option<PodIdentifierAttribute>; MAX_IDENTIFIER_LEN]);

impl PodIdentifier {
    /// Identifier made of a single attribute in the first slot
    pub fn single(attribute: PodIdentifierAttribute) -> Self {
        let mut id = Self::default();
        id.0[0] = Some(attribute);
        id
    }

    /// Build an identifier from up to [`MAX_IDENTIFIER_LEN`] attributes.
    ///
    /// Returns `None` if more attributes are given than fit.
    pub fn from_attributes<I>(attributes: I) -> Option<Self>
    where
        I: IntoIterator<Item = PodIdentifierAttribute>,
    {
        let mut id = Self::default();
        for (i, attr) in attributes.into_iter().enumerate() {
            if i >= MAX_IDENTIFIER_LEN {
                return None;
            }
            id.0[i] = Some(attr);
        }
        Some(id)
    }

    /// Overwrite slot `index`. Panics if `index >= MAX_IDENTIFIER_LEN`.
    pub fn set(&mut self, index: usize, attribute: PodIdentifierAttribute) {
        self.0[index] = Some(attribute);
    }

    pub fn get(&self, index: usize) -> Option<&PodIdentifierAttribute> {
        self.0.get(index).and_then(Option::as_ref)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &PodIdentifierAttribute> {
        self.0.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

impl fmt::Display for PodIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for attr in self.attributes() {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            match attr.source.from {
                SourceKind::Connection => write!(f, "connection={}", attr.value)?,
                SourceKind::ResourceAttribute => {
                    write!(f, "{}={}", attr.source.name, attr.value)?
                }
            }
        }
        Ok(())
    }
}

/// Attribute names written by the cache and understood by association rules
pub mod attributes {
    pub const K8S_NAMESPACE_NAME: &str = "k8s.namespace.name";
    pub const K8S_POD_NAME: &str = "k8s.pod.name";
    pub const K8S_POD_UID: &str = "k8s.pod.uid";
    pub const K8S_POD_IP: &str = "k8s.pod.ip";
    pub const K8S_POD_HOSTNAME: &str = "k8s.pod.hostname";
    pub const K8S_POD_START_TIME: &str = "k8s.pod.start_time";
    pub const K8S_NODE_NAME: &str = "k8s.node.name";
    pub const K8S_NODE_UID: &str = "k8s.node.uid";
    pub const K8S_CLUSTER_UID: &str = "k8s.cluster.uid";
    pub const K8S_REPLICASET_UID: &str = "k8s.replicaset.uid";
    pub const K8S_REPLICASET_NAME: &str = "k8s.replicaset.name";
    pub const K8S_DEPLOYMENT_UID: &str = "k8s.deployment.uid";
    pub const K8S_DEPLOYMENT_NAME: &str = "k8s.deployment.name";
    pub const K8S_DAEMONSET_UID: &str = "k8s.daemonset.uid";
    pub const K8S_DAEMONSET_NAME: &str = "k8s.daemonset.name";
    pub const K8S_STATEFULSET_UID: &str = "k8s.statefulset.uid";
    pub const K8S_STATEFULSET_NAME: &str = "k8s.statefulset.name";
    pub const K8S_JOB_UID: &str = "k8s.job.uid";
    pub const K8S_JOB_NAME: &str = "k8s.job.name";
    pub const K8S_CRONJOB_NAME: &str = "k8s.cronjob.name";
    pub const CONTAINER_ID: &str = "container.id";
    pub const HOST_NAME: &str = "host.name";
    pub const SERVICE_NAME: &str = "service.name";
    pub const SERVICE_VERSION: &str = "service.version";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_equality_is_structural() {
        let a = PodIdentifier::single(PodIdentifierAttribute::from_connection("10.0.0.5"));
        let b = PodIdentifier::from_attributes([PodIdentifierAttribute::from_connection(
            "10.0.0.5",
        )])
        .unwrap();

        assert_eq!(a, b);
        assert_ne!(
            a,
            PodIdentifier::single(PodIdentifierAttribute::from_resource_attribute(
                attributes::K8S_POD_IP,
                "10.0.0.5"
            ))
        );
    }

    #[test]
    fn test_identifier_too_long() {
        let attrs = (0..5).map(|i| PodIdentifierAttribute::from_connection(i.to_string()));
        assert!(PodIdentifier::from_attributes(attrs).is_none());
    }

    #[test]
    fn test_identifier_display() {
        let mut id = PodIdentifier::single(PodIdentifierAttribute::from_resource_attribute(
            attributes::K8S_NAMESPACE_NAME,
            "default",
        ));
        id.set(1, PodIdentifierAttribute::from_connection("10.0.0.5"));

        assert_eq!(id.to_string(), "k8s.namespace.name=default,connection=10.0.0.5");
        assert!(!id.is_empty());
        assert!(PodIdentifier::default().is_empty());
    }
}
