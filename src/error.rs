use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    KubernetesError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid pod association: {0}")]
    InvalidAssociation(String),

    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Watch source for {0} was already taken")]
    SourceUnavailable(&'static str),

    #[error("Cache was already started")]
    AlreadyStarted,

    #[error("Pod watch did not sync within {timeout:?}")]
    SyncTimeout { timeout: Duration },

    #[error("Pod watch stopped before its initial sync completed")]
    SyncAborted,

    #[error("Cache startup was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
