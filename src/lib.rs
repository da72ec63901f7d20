//! Watch-driven Kubernetes metadata cache
//!
//! Keeps pods, namespaces, nodes, deployments, statefulsets and replicasets
//! in memory, keyed so telemetry can be matched to the pod that produced it.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod k8s;
pub mod metrics;

pub use cache::WatchCache;
pub use error::{Error, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
