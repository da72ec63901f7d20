pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubemeta")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Watch-driven Kubernetes metadata cache for enriching telemetry", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the cache against the current cluster until interrupted")]
    Run {
        #[arg(short, long, help = "Cache configuration file (YAML)")]
        config: Option<PathBuf>,

        #[arg(long, help = "Block until the pod watch has synced")]
        wait_for_metadata: bool,

        #[arg(long, help = "Maximum time to wait for the pod watch, e.g. 10s")]
        wait_timeout: Option<String>,

        #[arg(long, help = "Print metrics in Prometheus text format on exit")]
        print_metrics: bool,
    },
    #[command(about = "Sync the cache once and look up a pod")]
    Lookup {
        #[arg(short, long, help = "Cache configuration file (YAML)")]
        config: Option<PathBuf>,

        #[arg(long, help = "Pod IP as seen on the connection")]
        ip: Option<String>,

        #[arg(long, help = "Pod UID")]
        uid: Option<String>,

        #[arg(
            long = "attr",
            value_name = "NAME=VALUE",
            help = "Resource attribute; repeat to build a multi-part identifier"
        )]
        attrs: Vec<String>,

        #[arg(long, help = "Maximum time to wait for the pod watch, e.g. 10s")]
        wait_timeout: Option<String>,
    },
    #[command(about = "Validate a configuration file and show which watches it needs")]
    CheckConfig {
        #[arg(short, long, help = "Cache configuration file (YAML)")]
        config: PathBuf,
    },
}
