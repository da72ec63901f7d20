use crate::metrics::collector::CacheMetrics;
use crate::Result;
use prometheus::{Encoder, TextEncoder};

/// Renders cache metrics in the Prometheus text exposition format
pub struct PrometheusExporter {
    metrics: CacheMetrics,
}

impl PrometheusExporter {
    pub fn new(metrics: CacheMetrics) -> Self {
        Self { metrics }
    }

    pub fn render(&self) -> Result<String> {
        let families = self.metrics.registry().gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
