use super::types::ResourceKind;
use super::watcher::{KubeWatchSource, WatchSource};
use crate::config::{FilterOp, Filters};
use crate::{Error, Result};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::watcher;
use kube::{Api, Client, Resource};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Label and field selector strings for the pod watch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selectors {
    pub label: String,
    pub field: String,
}

const MAX_LABEL_NAME_LEN: usize = 63;
const MAX_LABEL_PREFIX_LEN: usize = 253;

fn label_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9](?:[-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("valid label pattern")
    })
}

fn dns_subdomain_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9](?:[-a-z0-9]*[a-z0-9])?(?:\.[a-z0-9](?:[-a-z0-9]*[a-z0-9])?)*$")
            .expect("valid subdomain pattern")
    })
}

fn is_label_name(name: &str) -> bool {
    name.len() <= MAX_LABEL_NAME_LEN && label_name_pattern().is_match(name)
}

/// Label keys are qualified names: `[prefix/]name` with a DNS subdomain prefix
fn validate_label_key(key: &str) -> Result<()> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    let prefix_ok = prefix.map_or(true, |p| {
        p.len() <= MAX_LABEL_PREFIX_LEN && dns_subdomain_pattern().is_match(p)
    });
    if !prefix_ok || !is_label_name(name) {
        return Err(Error::InvalidSelector(format!(
            "{key:?} is not a valid label key"
        )));
    }
    Ok(())
}

fn validate_label_value(key: &str, value: &str) -> Result<()> {
    if !value.is_empty() && !is_label_name(value) {
        return Err(Error::InvalidSelector(format!(
            "{value:?} is not a valid value for label {key:?}"
        )));
    }
    Ok(())
}

fn validate_field_term(key: &str, value: &str) -> Result<()> {
    let bad_key = key.is_empty()
        || key.contains(|c: char| c == ',' || c == '=' || c == '!' || c.is_whitespace());
    if bad_key {
        return Err(Error::InvalidSelector(format!(
            "{key:?} is not a valid field selector key"
        )));
    }
    if value.contains(|c: char| c == ',' || c == '=') {
        return Err(Error::InvalidSelector(format!(
            "{value:?} is not a valid value for field {key:?}"
        )));
    }
    Ok(())
}

/// Compile filters into selector strings. Label keys and values are checked
/// against Kubernetes label syntax; field selectors only support equality and
/// inequality.
pub fn selectors_from_filters(filters: &Filters) -> Result<Selectors> {
    let mut labels = Vec::with_capacity(filters.labels.len());
    for filter in &filters.labels {
        validate_label_key(&filter.key)?;
        if matches!(filter.op, FilterOp::Equals | FilterOp::NotEquals) {
            validate_label_value(&filter.key, &filter.value)?;
        }
        labels.push(match filter.op {
            FilterOp::Equals => format!("{}={}", filter.key, filter.value),
            FilterOp::NotEquals => format!("{}!={}", filter.key, filter.value),
            FilterOp::Exists => filter.key.clone(),
            FilterOp::DoesNotExist => format!("!{}", filter.key),
        });
    }

    let mut fields = Vec::with_capacity(filters.fields.len() + 1);
    for filter in &filters.fields {
        validate_field_term(&filter.key, &filter.value)?;
        fields.push(match filter.op {
            FilterOp::Equals => format!("{}={}", filter.key, filter.value),
            FilterOp::NotEquals => format!("{}!={}", filter.key, filter.value),
            op => {
                return Err(Error::InvalidSelector(format!(
                    "field filter operator {:?} not supported on {}",
                    op.as_str(),
                    filter.key
                )))
            }
        });
    }
    if let Some(node) = &filters.node {
        validate_field_term("spec.nodeName", node)?;
        fields.push(format!("spec.nodeName={}", node));
    }

    Ok(Selectors {
        label: labels.join(","),
        field: fields.join(","),
    })
}

/// Where the pod watch looks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodScope {
    pub namespace: Option<String>,
    pub selectors: Selectors,
}

impl PodScope {
    pub fn from_filters(filters: &Filters) -> Result<Self> {
        Ok(Self {
            namespace: filters.namespace.clone(),
            selectors: selectors_from_filters(filters)?,
        })
    }
}

/// Which namespaces the namespace watch covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceScope {
    All,
    /// Only `kube-system`, for the cluster uid
    KubeSystem,
}

/// Builds the per-kind watch sources a cache runs on
pub trait SourceProvider: Send + Sync {
    fn pods(&self, scope: &PodScope) -> Result<Box<dyn WatchSource<Pod>>>;

    fn namespaces(&self, scope: &NamespaceScope) -> Result<Box<dyn WatchSource<Namespace>>>;

    fn nodes(&self, node: Option<&str>) -> Result<Box<dyn WatchSource<Node>>>;

    fn deployments(&self, namespace: Option<&str>) -> Result<Box<dyn WatchSource<Deployment>>>;

    fn stateful_sets(&self, namespace: Option<&str>)
        -> Result<Box<dyn WatchSource<StatefulSet>>>;

    fn replica_sets(&self, namespace: Option<&str>) -> Result<Box<dyn WatchSource<ReplicaSet>>>;
}

/// Source provider watching a live cluster
pub struct KubeSourceProvider {
    client: Client,
}

impl KubeSourceProvider {
    pub async fn try_default() -> Result<Self> {
        debug!("Initializing Kubernetes client");

        let client = Client::try_default().await.map_err(|e| {
            Error::KubernetesError(format!("Failed to create K8s client: {}", e))
        })?;

        info!("Successfully connected to Kubernetes cluster");

        Ok(Self { client })
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

fn watch_config(selectors: &Selectors) -> watcher::Config {
    let mut config = watcher::Config::default();
    if !selectors.label.is_empty() {
        config = config.labels(&selectors.label);
    }
    if !selectors.field.is_empty() {
        config = config.fields(&selectors.field);
    }
    config
}

impl SourceProvider for KubeSourceProvider {
    fn pods(&self, scope: &PodScope) -> Result<Box<dyn WatchSource<Pod>>> {
        Ok(Box::new(KubeWatchSource::new(
            ResourceKind::Pod,
            self.namespaced(scope.namespace.as_deref()),
            watch_config(&scope.selectors),
        )))
    }

    fn namespaces(&self, scope: &NamespaceScope) -> Result<Box<dyn WatchSource<Namespace>>> {
        let config = match scope {
            NamespaceScope::All => watcher::Config::default(),
            NamespaceScope::KubeSystem => watcher::Config::default()
                .fields(&format!("metadata.name={}", KUBE_SYSTEM_NAMESPACE)),
        };
        Ok(Box::new(KubeWatchSource::new(
            ResourceKind::Namespace,
            Api::all(self.client.clone()),
            config,
        )))
    }

    fn nodes(&self, node: Option<&str>) -> Result<Box<dyn WatchSource<Node>>> {
        let mut config = watcher::Config::default();
        if let Some(node) = node {
            config = config.fields(&format!("metadata.name={}", node));
        }
        Ok(Box::new(KubeWatchSource::new(
            ResourceKind::Node,
            Api::all(self.client.clone()),
            config,
        )))
    }

    fn deployments(&self, namespace: Option<&str>) -> Result<Box<dyn WatchSource<Deployment>>> {
        Ok(Box::new(KubeWatchSource::new(
            ResourceKind::Deployment,
            self.namespaced(namespace),
            watcher::Config::default(),
        )))
    }

    fn stateful_sets(
        &self,
        namespace: Option<&str>,
    ) -> Result<Box<dyn WatchSource<StatefulSet>>> {
        Ok(Box::new(KubeWatchSource::new(
            ResourceKind::StatefulSet,
            self.namespaced(namespace),
            watcher::Config::default(),
        )))
    }

    fn replica_sets(&self, namespace: Option<&str>) -> Result<Box<dyn WatchSource<ReplicaSet>>> {
        Ok(Box::new(KubeWatchSource::new(
            ResourceKind::ReplicaSet,
            self.namespaced(namespace),
            watcher::Config::default(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorFilter;

    fn filter(key: &str, value: &str, op: FilterOp) -> SelectorFilter {
        SelectorFilter {
            key: key.to_string(),
            value: value.to_string(),
            op,
        }
    }

    #[test]
    fn test_label_selectors() {
        let filters = Filters {
            labels: vec![
                filter("tier", "web", FilterOp::Equals),
                filter("env", "dev", FilterOp::NotEquals),
                filter("team", "", FilterOp::Exists),
                filter("canary", "", FilterOp::DoesNotExist),
            ],
            ..Default::default()
        };

        let selectors = selectors_from_filters(&filters).unwrap();
        assert_eq!(selectors.label, "tier=web,env!=dev,team,!canary");
        assert!(selectors.field.is_empty());
    }

    #[test]
    fn test_field_selectors_with_node() {
        let filters = Filters {
            node: Some("node-a".to_string()),
            fields: vec![filter("status.phase", "Running", FilterOp::Equals)],
            ..Default::default()
        };

        let selectors = selectors_from_filters(&filters).unwrap();
        assert_eq!(selectors.field, "status.phase=Running,spec.nodeName=node-a");
    }

    #[test]
    fn test_field_selector_rejects_exists() {
        let filters = Filters {
            fields: vec![filter("status.phase", "", FilterOp::Exists)],
            ..Default::default()
        };

        assert!(matches!(
            selectors_from_filters(&filters),
            Err(Error::InvalidSelector(_))
        ));
    }

    #[test]
    fn test_label_selector_rejects_malformed_terms() {
        for bad in [
            filter("tier,env", "web", FilterOp::Equals),
            filter("tier=x", "", FilterOp::Exists),
            filter("tier", "a b", FilterOp::Equals),
            filter("tier", "web,env=dev", FilterOp::NotEquals),
            filter("Example.com/tier", "web", FilterOp::Equals),
            filter("a/b/c", "", FilterOp::DoesNotExist),
            filter(&"x".repeat(64), "web", FilterOp::Equals),
        ] {
            let filters = Filters {
                labels: vec![bad.clone()],
                ..Default::default()
            };
            assert!(
                matches!(
                    selectors_from_filters(&filters),
                    Err(Error::InvalidSelector(_))
                ),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_label_selector_accepts_qualified_keys() {
        let filters = Filters {
            labels: vec![
                filter("app.kubernetes.io/name", "web_front-1.0", FilterOp::Equals),
                filter("tier", "", FilterOp::Equals),
            ],
            ..Default::default()
        };

        let selectors = selectors_from_filters(&filters).unwrap();
        assert_eq!(selectors.label, "app.kubernetes.io/name=web_front-1.0,tier=");
    }

    #[test]
    fn test_field_selector_rejects_separators() {
        let filters = Filters {
            fields: vec![filter("status.phase", "Running,spec.nodeName=x", FilterOp::Equals)],
            ..Default::default()
        };
        assert!(matches!(
            selectors_from_filters(&filters),
            Err(Error::InvalidSelector(_))
        ));

        let filters = Filters {
            node: Some("node-a,node-b".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            selectors_from_filters(&filters),
            Err(Error::InvalidSelector(_))
        ));
    }

    #[test]
    fn test_pod_scope_keeps_namespace() {
        let filters = Filters {
            namespace: Some("apps".to_string()),
            ..Default::default()
        };
        let scope = PodScope::from_filters(&filters).unwrap();
        assert_eq!(scope.namespace.as_deref(), Some("apps"));
        assert_eq!(scope.selectors, Selectors::default());
    }
}
