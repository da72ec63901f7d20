//! Cache configuration
//!
//! [`CacheConfig`] is the YAML surface; [`CacheConfig::compile`] validates it
//! and produces the typed [`CacheOptions`] that [`crate::cache::WatchCache`]
//! is built from. Everything that can be rejected up front (patterns,
//! association shapes, unknown attribute names) is rejected here.

use crate::extract::rules::{ExtractionRules, FieldExtractionRule, MetadataFrom};
use crate::{Error, Result};
use kubemeta_common::{AssociationSource, SourceKind, MAX_IDENTIFIER_LEN};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_WAIT_FOR_METADATA_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DELETE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_DELETE_GRACE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_DEPENDENCY_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Attribute names extracted when `extract.metadata` is not given
pub const DEFAULT_METADATA: &[&str] = &[
    "k8s.namespace.name",
    "k8s.pod.name",
    "k8s.pod.uid",
    "k8s.pod.start_time",
    "k8s.deployment.name",
    "k8s.node.name",
    "container.image.name",
    "container.image.tag",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub extract: ExtractConfig,
    pub filter: FilterConfig,
    pub pod_association: Vec<AssociationConfig>,
    pub exclude: ExcludeConfig,
    pub wait_for_metadata: bool,
    #[serde(with = "duration_str", skip_serializing_if = "Option::is_none")]
    pub wait_for_metadata_timeout: Option<Duration>,
    #[serde(with = "duration_str", skip_serializing_if = "Option::is_none")]
    pub delete_interval: Option<Duration>,
    #[serde(with = "duration_str", skip_serializing_if = "Option::is_none")]
    pub delete_grace_period: Option<Duration>,
    #[serde(with = "duration_str", skip_serializing_if = "Option::is_none")]
    pub dependency_sync_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractConfig {
    pub metadata: Option<Vec<String>>,
    pub labels: Vec<FieldRuleConfig>,
    pub annotations: Vec<FieldRuleConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldRuleConfig {
    pub tag_name: Option<String>,
    pub key: Option<String>,
    pub key_regex: Option<String>,
    pub from: MetadataFrom,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub namespace: Option<String>,
    pub node: Option<String>,
    /// Name of an environment variable holding the node name
    pub node_from_env_var: Option<String>,
    pub labels: Vec<SelectorConfig>,
    pub fields: Vec<SelectorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectorConfig {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub op: FilterOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssociationConfig {
    pub sources: Vec<AssociationSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExcludeConfig {
    pub pods: Vec<ExcludePodConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExcludePodConfig {
    pub name: String,
}

/// Selector operator for label and field filters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOp {
    #[default]
    Equals,
    NotEquals,
    Exists,
    DoesNotExist,
}

impl FilterOp {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Equals => "equals",
            FilterOp::NotEquals => "not-equals",
            FilterOp::Exists => "exists",
            FilterOp::DoesNotExist => "does-not-exist",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorFilter {
    pub key: String,
    pub value: String,
    pub op: FilterOp,
}

/// Scoping applied to the watch streams
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub namespace: Option<String>,
    pub node: Option<String>,
    pub labels: Vec<SelectorFilter>,
    pub fields: Vec<SelectorFilter>,
}

/// Ordered list of sources whose values together identify a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub sources: Vec<AssociationSource>,
}

#[derive(Debug, Clone, Default)]
pub struct Excludes {
    pub pods: Vec<Regex>,
}

impl Excludes {
    pub fn matches(&self, pod_name: &str) -> bool {
        self.pods.iter().any(|re| re.is_match(pod_name))
    }
}

/// Validated cache configuration
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub rules: ExtractionRules,
    pub filters: Filters,
    pub associations: Vec<Association>,
    pub excludes: Excludes,
    pub wait_for_metadata: bool,
    pub wait_for_metadata_timeout: Duration,
    pub delete_interval: Duration,
    pub delete_grace_period: Duration,
    pub dependency_sync_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            rules: ExtractionRules::default(),
            filters: Filters::default(),
            associations: Vec::new(),
            excludes: Excludes::default(),
            wait_for_metadata: false,
            wait_for_metadata_timeout: DEFAULT_WAIT_FOR_METADATA_TIMEOUT,
            delete_interval: DEFAULT_DELETE_INTERVAL,
            delete_grace_period: DEFAULT_DELETE_GRACE_PERIOD,
            dependency_sync_timeout: DEFAULT_DEPENDENCY_SYNC_TIMEOUT,
        }
    }
}

impl CacheConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn compile(&self) -> Result<CacheOptions> {
        let rules = self.extract.compile()?;
        let filters = self.filter.compile()?;

        let associations = self
            .pod_association
            .iter()
            .map(AssociationConfig::compile)
            .collect::<Result<Vec<_>>>()?;

        let excludes = Excludes {
            pods: self
                .exclude
                .pods
                .iter()
                .map(|p| compile_pattern(&p.name))
                .collect::<Result<Vec<_>>>()?,
        };

        let delete_interval = self.delete_interval.unwrap_or(DEFAULT_DELETE_INTERVAL);
        if delete_interval.is_zero() {
            return Err(Error::ConfigError(
                "delete_interval must be greater than zero".to_string(),
            ));
        }

        Ok(CacheOptions {
            rules,
            filters,
            associations,
            excludes,
            wait_for_metadata: self.wait_for_metadata,
            wait_for_metadata_timeout: self
                .wait_for_metadata_timeout
                .unwrap_or(DEFAULT_WAIT_FOR_METADATA_TIMEOUT),
            delete_interval,
            delete_grace_period: self
                .delete_grace_period
                .unwrap_or(DEFAULT_DELETE_GRACE_PERIOD),
            dependency_sync_timeout: self
                .dependency_sync_timeout
                .unwrap_or(DEFAULT_DEPENDENCY_SYNC_TIMEOUT),
        })
    }
}

impl ExtractConfig {
    fn compile(&self) -> Result<ExtractionRules> {
        let mut rules = ExtractionRules::default();

        let metadata: Vec<&str> = match &self.metadata {
            Some(names) => names.iter().map(String::as_str).collect(),
            None => DEFAULT_METADATA.to_vec(),
        };
        for name in metadata {
            rules.enable(name)?;
        }

        rules.labels = self
            .labels
            .iter()
            .map(|r| r.compile("labels"))
            .collect::<Result<Vec<_>>>()?;
        rules.annotations = self
            .annotations
            .iter()
            .map(|r| r.compile("annotations"))
            .collect::<Result<Vec<_>>>()?;

        Ok(rules)
    }
}

impl FieldRuleConfig {
    fn compile(&self, field: &str) -> Result<FieldExtractionRule> {
        match (&self.key, &self.key_regex) {
            (Some(key), None) => {
                let name = self
                    .tag_name
                    .clone()
                    .unwrap_or_else(|| format!("k8s.{}.{}.{}", self.from.as_str(), field, key));
                Ok(FieldExtractionRule {
                    name,
                    key: key.clone(),
                    key_regex: None,
                    has_key_regex_reference: false,
                    from: self.from,
                })
            }
            (None, Some(pattern)) => {
                // Key patterns always match the whole key
                let key_regex = compile_pattern(&format!("^(?:{pattern})$"))?;
                let name = self.tag_name.clone().unwrap_or_default();
                let has_key_regex_reference = name.contains('$');
                Ok(FieldExtractionRule {
                    name,
                    key: String::new(),
                    key_regex: Some(key_regex),
                    has_key_regex_reference,
                    from: self.from,
                })
            }
            (Some(_), Some(_)) => Err(Error::ConfigError(format!(
                "{field} rule cannot set both key and key_regex"
            ))),
            (None, None) => Err(Error::ConfigError(format!(
                "{field} rule needs either key or key_regex"
            ))),
        }
    }
}

impl FilterConfig {
    fn compile(&self) -> Result<Filters> {
        let node = match (&self.node, &self.node_from_env_var) {
            (Some(node), _) => Some(node.clone()),
            (None, Some(var)) => match std::env::var(var) {
                Ok(node) if !node.is_empty() => Some(node),
                _ => {
                    return Err(Error::ConfigError(format!(
                        "node_from_env_var {var} is not set"
                    )))
                }
            },
            (None, None) => None,
        };

        let to_filter = |s: &SelectorConfig| SelectorFilter {
            key: s.key.clone(),
            value: s.value.clone(),
            op: s.op,
        };

        Ok(Filters {
            namespace: self.namespace.clone(),
            node,
            labels: self.labels.iter().map(to_filter).collect(),
            fields: self.fields.iter().map(to_filter).collect(),
        })
    }
}

impl AssociationConfig {
    fn compile(&self) -> Result<Association> {
        if self.sources.is_empty() {
            return Err(Error::InvalidAssociation(
                "association needs at least one source".to_string(),
            ));
        }
        if self.sources.len() > MAX_IDENTIFIER_LEN {
            return Err(Error::InvalidAssociation(format!(
                "association has {} sources, at most {} are supported",
                self.sources.len(),
                MAX_IDENTIFIER_LEN
            )));
        }

        let mut sources = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            match source.from {
                SourceKind::Connection => sources.push(AssociationSource::connection()),
                SourceKind::ResourceAttribute => {
                    if source.name.is_empty() {
                        return Err(Error::InvalidAssociation(
                            "resource_attribute source needs a name".to_string(),
                        ));
                    }
                    sources.push(source.clone());
                }
            }
        }

        Ok(Association { sources })
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| Error::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Parse durations like `500ms`, `10s`, `2m` or `1h`
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::ConfigError(format!("duration {raw:?} is missing a unit")))?;
    let (value, unit) = raw.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| Error::ConfigError(format!("invalid duration {raw:?}")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => scaled_secs(value, 60, raw),
        "h" => scaled_secs(value, 3600, raw),
        _ => Err(Error::ConfigError(format!(
            "unknown duration unit {unit:?} in {raw:?}"
        ))),
    }
}

fn scaled_secs(value: u64, factor: u64, raw: &str) -> Result<Duration> {
    value
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::ConfigError(format!("duration {raw:?} is too large")))
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_str(&format!("{}ms", d.as_millis())),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|r| super::parse_duration(&r).map_err(serde::de::Error::custom))
            .transpose()
    }
}
