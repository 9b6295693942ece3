//! Eidetic Daemon - memory cache with background consolidation and an admin API

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use eidetic::admin::AdminServer;
use eidetic::config::Config;
use eidetic::engine::EideticCache;
use eidetic::error::Result;
use eidetic::tier::TierRegistry;

/// Eidetic - weight-tiered memory cache that never forgets
#[derive(Parser)]
#[command(name = "eidetic")]
#[command(about = "A weight-tiered memory cache with background consolidation")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config, cli.data_dir).await,
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,eidetic=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting Eidetic daemon");

    let mut config = Config::load(config_path)?;
    if let Some(data_dir) = data_dir {
        config.storage.data_dir = data_dir;
    }
    tracing::debug!("Config loaded: {:?}", config);

    let data_dir = &config.storage.data_dir;
    tracing::info!("Initializing storage at: {}", data_dir.display());
    std::fs::create_dir_all(data_dir).map_err(|e| {
        eidetic::EideticError::Storage(format!(
            "Failed to create data directory {}: {}",
            data_dir.display(),
            e
        ))
    })?;

    let admin_config = config.admin.clone();
    let cache = Arc::new(EideticCache::open(config, TierRegistry::in_memory()).await?);
    tracing::info!("Cache ready with tiers {:?}", cache.tiers().ids());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consolidation = cache.spawn_consolidation(shutdown_rx);

    let server = AdminServer::new(admin_config, cache.clone());
    let served = server.serve().await;

    let _ = shutdown_tx.send(true);
    for handle in consolidation {
        if let Err(e) = handle.await {
            tracing::error!("Consolidation task failed: {e}");
        }
    }

    cache.save_snapshot()?;
    tracing::info!("Eidetic daemon stopped");
    served
}
