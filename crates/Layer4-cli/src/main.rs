//! Styx driver CLI - Main entry point

mod info;
mod maintenance;
mod task;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use styx_foundation::DriverConfig;
use styx_task::Driver;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Styx - Apple container task driver
#[derive(Parser, Debug)]
#[command(name = "styx-driver")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Driver config file (.json or .toml), layered over the global config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print plugin metadata, capabilities and config schemas
    Info,

    /// Print health reports as they are produced
    Fingerprint {
        /// Stop after this many reports
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Start a task and wait for it to exit
    Run(task::RunArgs),

    /// Reattach to a task from a persisted handle and wait for it to exit
    Recover {
        /// Handle file written by `run`
        #[arg(long)]
        handle: PathBuf,
    },

    /// List containers
    Ps {
        /// Include stopped containers
        #[arg(short, long)]
        all: bool,
    },

    /// Print container logs
    Logs {
        container: String,
    },

    /// Show disk usage of the container runtime
    Df,

    /// Remove unused images
    Prune,

    /// Manage the shared network
    Network {
        #[command(subcommand)]
        action: maintenance::NetworkAction,
    },

    /// Manage named volumes
    Volume {
        #[command(subcommand)]
        action: maintenance::VolumeAction,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = DriverConfig::load(args.config.as_deref()).context("Failed to load driver config")?;
    tracing::debug!(bin = %config.container_bin(), network = %config.network.name, "driver config loaded");

    let driver = Driver::new(config.clone());

    match args.command {
        Command::Info => info::print_info(&driver),
        Command::Fingerprint { count } => info::watch_fingerprint(&driver, count).await,
        Command::Run(run) => task::run(&driver, run).await,
        Command::Recover { handle } => task::recover(&driver, &handle).await,
        Command::Ps { all } => maintenance::ps(&driver, all).await,
        Command::Logs { container } => maintenance::logs(&driver, &container).await,
        Command::Df => maintenance::disk_usage(&driver).await,
        Command::Prune => maintenance::prune(&driver).await,
        Command::Network { action } => maintenance::network(&driver, &config, action).await,
        Command::Volume { action } => maintenance::volume(&driver, action).await,
    }
}
