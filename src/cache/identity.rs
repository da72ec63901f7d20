//! Identifier derivation for pod records

use crate::config::Association;
use crate::k8s::types::PodRecord;
use kubemeta_common::{
    attributes as attr, AssociationSource, PodIdentifier, PodIdentifierAttribute, SourceKind,
};
use std::collections::HashSet;

/// Derives every identifier a pod can be looked up under
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    associations: Vec<Association>,
}

/// Outcome of resolving one association source
enum Slot {
    Value(String),
    /// Fans out over the pod's container ids
    ContainerId,
}

impl IdentityResolver {
    pub fn new(associations: Vec<Association>) -> Self {
        Self { associations }
    }

    /// All identifiers for `pod`: one or more per satisfiable association
    /// rule, then the pod UID and address fallbacks. Duplicates are dropped,
    /// keeping the first occurrence.
    pub fn identifiers(&self, pod: &PodRecord) -> Vec<PodIdentifier> {
        let mut ids = Vec::new();

        for association in &self.associations {
            ids.extend(self.resolve(association, pod));
        }

        if !pod.uid.is_empty() {
            ids.push(PodIdentifier::single(
                PodIdentifierAttribute::from_resource_attribute(attr::K8S_POD_UID, &pod.uid),
            ));
        }

        if !pod.address.is_empty() && !pod.host_network {
            ids.push(PodIdentifier::single(PodIdentifierAttribute::from_connection(
                &pod.address,
            )));
            ids.push(PodIdentifier::single(
                PodIdentifierAttribute::from_resource_attribute(attr::K8S_POD_IP, &pod.address),
            ));
        }

        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        ids
    }

    fn resolve(&self, association: &Association, pod: &PodRecord) -> Vec<PodIdentifier> {
        let mut id = PodIdentifier::default();
        let mut container_slot = None;

        for (i, source) in association.sources.iter().enumerate() {
            match resolve_source(source, pod) {
                Some(Slot::Value(value)) => {
                    id.set(i, PodIdentifierAttribute::from_source(source, value))
                }
                Some(Slot::ContainerId) => container_slot = Some((i, source)),
                None => return Vec::new(),
            }
        }

        match container_slot {
            None => vec![id],
            Some((i, source)) => pod
                .containers
                .by_id
                .keys()
                .map(|container_id| {
                    let mut id = id.clone();
                    id.set(i, PodIdentifierAttribute::from_source(source, container_id));
                    id
                })
                .collect(),
        }
    }
}

fn resolve_source(source: &AssociationSource, pod: &PodRecord) -> Option<Slot> {
    let value = match source.from {
        SourceKind::Connection => {
            // host network pods share the node address
            if pod.host_network {
                return None;
            }
            pod.address.clone()
        }
        SourceKind::ResourceAttribute => match source.name.as_str() {
            attr::K8S_NAMESPACE_NAME => pod.namespace.clone(),
            attr::K8S_POD_NAME => pod.name.clone(),
            attr::K8S_POD_UID => pod.uid.clone(),
            attr::HOST_NAME | attr::K8S_POD_IP => pod.address.clone(),
            attr::CONTAINER_ID => return Some(Slot::ContainerId),
            other => pod.attributes.get(other).cloned().unwrap_or_default(),
        },
    };

    if value.is_empty() {
        None
    } else {
        Some(Slot::Value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::types::{Container, PodContainers};
    use std::sync::Arc;

    fn pod() -> PodRecord {
        let container = Arc::new(Container::default());
        PodRecord {
            name: "web-1".to_string(),
            namespace: "default".to_string(),
            uid: "u1".to_string(),
            address: "10.0.0.5".to_string(),
            containers: PodContainers {
                by_id: [
                    ("c1".to_string(), Arc::clone(&container)),
                    ("c2".to_string(), Arc::clone(&container)),
                ]
                .into_iter()
                .collect(),
                by_name: Default::default(),
            },
            ..Default::default()
        }
    }

    fn association(sources: Vec<AssociationSource>) -> Association {
        Association { sources }
    }

    #[test]
    fn test_uid_rule_with_fallbacks() {
        let resolver = IdentityResolver::new(vec![association(vec![
            AssociationSource::resource_attribute(attr::K8S_POD_UID),
        ])]);
        let ids = resolver.identifiers(&pod());

        assert_eq!(
            ids,
            vec![
                PodIdentifier::single(PodIdentifierAttribute::from_resource_attribute(
                    attr::K8S_POD_UID,
                    "u1"
                )),
                PodIdentifier::single(PodIdentifierAttribute::from_connection("10.0.0.5")),
                PodIdentifier::single(PodIdentifierAttribute::from_resource_attribute(
                    attr::K8S_POD_IP,
                    "10.0.0.5"
                )),
            ]
        );
    }

    #[test]
    fn test_host_network_has_no_connection_identifier() {
        let resolver = IdentityResolver::new(vec![
            association(vec![AssociationSource::connection()]),
            association(vec![AssociationSource::resource_attribute(attr::K8S_POD_IP)]),
        ]);
        let mut pod = pod();
        pod.host_network = true;

        let ids = resolver.identifiers(&pod);
        assert!(ids
            .iter()
            .flat_map(|id| id.attributes())
            .all(|a| a.source.from != SourceKind::Connection));
        // the explicit k8s.pod.ip rule still applies
        assert!(ids.contains(&PodIdentifier::single(
            PodIdentifierAttribute::from_resource_attribute(attr::K8S_POD_IP, "10.0.0.5")
        )));
    }

    #[test]
    fn test_container_id_fans_out() {
        let resolver = IdentityResolver::new(vec![association(vec![
            AssociationSource::resource_attribute(attr::K8S_NAMESPACE_NAME),
            AssociationSource::resource_attribute(attr::CONTAINER_ID),
        ])]);
        let ids = resolver.identifiers(&pod());

        let fanned: Vec<_> = ids
            .iter()
            .filter(|id| id.get(1).is_some())
            .collect();
        assert_eq!(fanned.len(), 2);
        for id in &fanned {
            assert_eq!(id.get(0).unwrap().value, "default");
        }
        let mut container_ids: Vec<_> = fanned
            .iter()
            .map(|id| id.get(1).unwrap().value.as_str())
            .collect();
        container_ids.sort();
        assert_eq!(container_ids, vec!["c1", "c2"]);
    }

    #[test]
    fn test_container_id_without_containers() {
        let resolver = IdentityResolver::new(vec![association(vec![
            AssociationSource::resource_attribute(attr::CONTAINER_ID),
        ])]);
        let mut pod = pod();
        pod.containers = PodContainers::default();

        // only the uid and address fallbacks remain
        assert_eq!(resolver.identifiers(&pod).len(), 3);
    }

    #[test]
    fn test_rule_skipped_when_attribute_missing() {
        let resolver = IdentityResolver::new(vec![association(vec![
            AssociationSource::resource_attribute(attr::K8S_POD_NAME),
            AssociationSource::resource_attribute("k8s.deployment.name"),
        ])]);
        let mut pod = pod();
        assert_eq!(resolver.identifiers(&pod).len(), 3);

        pod.attributes
            .insert("k8s.deployment.name".to_string(), "web".to_string());
        let ids = resolver.identifiers(&pod);
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0].to_string(), "k8s.pod.name=web-1,k8s.deployment.name=web");
    }

    #[test]
    fn test_empty_pod_has_no_identifiers() {
        let resolver = IdentityResolver::new(vec![association(vec![
            AssociationSource::connection(),
        ])]);
        assert!(resolver.identifiers(&PodRecord::default()).is_empty());
    }
}
