use crate::k8s::types::ResourceKind;
use crate::Result;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Counters and gauges describing cache activity
#[derive(Clone)]
pub struct CacheMetrics {
    registry: Registry,
    added: IntCounterVec,
    updated: IntCounterVec,
    deleted: IntCounterVec,
    pod_table_size: IntGauge,
    lookup_misses: IntCounter,
}

impl CacheMetrics {
    /// Metrics registered in a fresh registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self> {
        let added = IntCounterVec::new(
            Opts::new("kubemeta_objects_added_total", "Objects added by watch events"),
            &["kind"],
        )?;
        let updated = IntCounterVec::new(
            Opts::new("kubemeta_objects_updated_total", "Objects updated by watch events"),
            &["kind"],
        )?;
        let deleted = IntCounterVec::new(
            Opts::new("kubemeta_objects_deleted_total", "Objects deleted by watch events"),
            &["kind"],
        )?;
        let pod_table_size =
            IntGauge::new("kubemeta_pod_table_size", "Identifiers in the pod table")?;
        let lookup_misses = IntCounter::new(
            "kubemeta_pod_lookup_miss_total",
            "Pod lookups that found no record",
        )?;

        registry.register(Box::new(added.clone()))?;
        registry.register(Box::new(updated.clone()))?;
        registry.register(Box::new(deleted.clone()))?;
        registry.register(Box::new(pod_table_size.clone()))?;
        registry.register(Box::new(lookup_misses.clone()))?;

        Ok(Self {
            registry,
            added,
            updated,
            deleted,
            pod_table_size,
            lookup_misses,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_add(&self, kind: ResourceKind) {
        self.added.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn record_update(&self, kind: ResourceKind) {
        self.updated.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn record_delete(&self, kind: ResourceKind) {
        self.deleted.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn record_lookup_miss(&self) {
        self.lookup_misses.inc();
    }

    pub fn set_pod_table_size(&self, size: usize) {
        self.pod_table_size.set(size as i64);
    }

    pub fn added(&self, kind: ResourceKind) -> u64 {
        self.added.with_label_values(&[kind.as_str()]).get()
    }

    pub fn updated(&self, kind: ResourceKind) -> u64 {
        self.updated.with_label_values(&[kind.as_str()]).get()
    }

    pub fn deleted(&self, kind: ResourceKind) -> u64 {
        self.deleted.with_label_values(&[kind.as_str()]).get()
    }

    pub fn lookup_misses(&self) -> u64 {
        self.lookup_misses.get()
    }

    pub fn pod_table_size(&self) -> i64 {
        self.pod_table_size.get()
    }
}
