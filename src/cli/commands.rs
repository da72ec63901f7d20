use crate::cache::{WatchCache, WatchPlan};
use crate::cli::Commands;
use crate::config::{parse_duration, CacheConfig, CacheOptions};
use crate::k8s::{KubeSourceProvider, NamespaceScope, ResourceKind};
use crate::metrics::{CacheMetrics, PrometheusExporter};
use anyhow::{bail, Context, Result};
use kubemeta_common::{PodIdentifier, PodIdentifierAttribute};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            config,
            wait_for_metadata,
            wait_timeout,
            print_metrics,
        } => handle_run(config, wait_for_metadata, wait_timeout, print_metrics).await,
        Commands::Lookup {
            config,
            ip,
            uid,
            attrs,
            wait_timeout,
        } => handle_lookup(config, ip, uid, attrs, wait_timeout).await,
        Commands::CheckConfig { config } => handle_check_config(&config),
    }
}

fn load_options(path: Option<&Path>) -> Result<CacheOptions> {
    let config = match path {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => CacheConfig::default(),
    };
    config.compile().context("Invalid cache configuration")
}

fn apply_wait_flags(
    options: &mut CacheOptions,
    wait_for_metadata: bool,
    wait_timeout: Option<String>,
) -> Result<()> {
    if wait_for_metadata {
        options.wait_for_metadata = true;
    }
    if let Some(raw) = wait_timeout {
        options.wait_for_metadata_timeout = parse_duration(&raw)?;
    }
    Ok(())
}

async fn build_cache(options: CacheOptions) -> Result<WatchCache> {
    let provider = KubeSourceProvider::try_default().await?;
    let metrics = CacheMetrics::new()?;
    Ok(WatchCache::new(options, &provider, metrics)?)
}

async fn handle_run(
    config: Option<PathBuf>,
    wait_for_metadata: bool,
    wait_timeout: Option<String>,
    print_metrics: bool,
) -> Result<()> {
    let mut options = load_options(config.as_deref())?;
    apply_wait_flags(&mut options, wait_for_metadata, wait_timeout)?;

    let cache = build_cache(options).await?;
    cache.start().await.context("Cache startup failed")?;

    info!("Cache running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    cache.shutdown().await;
    info!("Pod table holds {} identifiers", cache.pod_table_len());

    if print_metrics {
        let exporter = PrometheusExporter::new(cache.metrics().clone());
        print!("{}", exporter.render()?);
    }
    Ok(())
}

/// Identifier from the lookup flags. `--attr` values fill consecutive slots;
/// `--ip` and `--uid` each form a single-slot identifier.
pub fn identifier_from_args(
    ip: Option<String>,
    uid: Option<String>,
    attrs: &[String],
) -> Result<PodIdentifier> {
    let given = [ip.is_some(), uid.is_some(), !attrs.is_empty()]
        .iter()
        .filter(|given| **given)
        .count();
    if given != 1 {
        bail!("Exactly one of --ip, --uid or --attr must be given");
    }

    if let Some(ip) = ip {
        return Ok(PodIdentifier::single(PodIdentifierAttribute::from_connection(ip)));
    }
    if let Some(uid) = uid {
        return Ok(PodIdentifier::single(
            PodIdentifierAttribute::from_resource_attribute(
                kubemeta_common::attributes::K8S_POD_UID,
                uid,
            ),
        ));
    }

    let mut parsed = Vec::with_capacity(attrs.len());
    for attr in attrs {
        let Some((name, value)) = attr.split_once('=') else {
            bail!("Attribute {:?} is not of the form NAME=VALUE", attr);
        };
        parsed.push(PodIdentifierAttribute::from_resource_attribute(name, value));
    }
    PodIdentifier::from_attributes(parsed).context("Too many --attr values for one identifier")
}

async fn handle_lookup(
    config: Option<PathBuf>,
    ip: Option<String>,
    uid: Option<String>,
    attrs: Vec<String>,
    wait_timeout: Option<String>,
) -> Result<()> {
    let id = identifier_from_args(ip, uid, &attrs)?;

    let mut options = load_options(config.as_deref())?;
    apply_wait_flags(&mut options, true, wait_timeout)?;

    let cache = build_cache(options).await?;
    if let Err(e) = cache.start().await {
        // a partially synced cache can still answer
        warn!("Cache not fully synced: {}", e);
    }

    let result = cache.get_pod(&id);
    cache.shutdown().await;

    match result {
        Some(pod) => {
            println!("{}", serde_json::to_string_pretty(pod.as_ref())?);
            Ok(())
        }
        None => bail!("No pod found for {}", id),
    }
}

fn handle_check_config(path: &Path) -> Result<()> {
    let options = load_options(Some(path))?;
    let rules = &options.rules;

    println!("Configuration {} is valid", path.display());
    println!("  associations: {}", options.associations.len());
    println!("  label rules: {}", rules.labels.len());
    println!("  annotation rules: {}", rules.annotations.len());
    println!("  exclude patterns: {}", options.excludes.pods.len());

    let plan = WatchPlan::for_rules(rules);
    let watches: Vec<String> = plan
        .kinds()
        .into_iter()
        .map(|kind| match (kind, &plan.namespaces) {
            (ResourceKind::Namespace, Some(NamespaceScope::KubeSystem)) => {
                format!("{} (kube-system only)", kind)
            }
            _ => kind.to_string(),
        })
        .collect();
    println!("  watches: {}", watches.join(", "));

    Ok(())
}
