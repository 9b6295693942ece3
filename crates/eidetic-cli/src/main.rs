use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eidetic::config::Config;
use eidetic::engine::EideticCache;
use eidetic::tier::TierRegistry;
use eidetic_cli::commands::{ConsolidateCommand, RecallCommand, ShowCommand, StatsCommand, StoreCommand};
use eidetic_cli::error::CliResult;
use eidetic_cli::output::OutputFormat;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "eidetic-cli")]
#[command(about = "Eidetic CLI - Operator tool for the eidetic memory cache")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(long, short, global = true, help = "Log to stderr")]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Store new content")]
    Store(StoreCommand),

    #[clap(about = "Recall memories matching a query")]
    Recall(RecallCommand),

    #[clap(about = "Show a memory by id")]
    Show(ShowCommand),

    #[clap(about = "Run consolidation cycles")]
    Consolidate(ConsolidateCommand),

    #[clap(about = "Show cache statistics")]
    Stats(StatsCommand),
}

impl Command {
    /// Whether the command changes records and needs a snapshot afterwards
    fn mutates(&self) -> bool {
        matches!(
            self,
            Command::Store(_) | Command::Recall(_) | Command::Consolidate(_)
        )
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    if cli.verbose {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,eidetic=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let mut config = Config::load(cli.config.clone())?;
    if let Some(data_dir) = cli.data_dir.clone() {
        config.storage.data_dir = data_dir;
    }
    std::fs::create_dir_all(&config.storage.data_dir)?;

    let cache = EideticCache::open(config, TierRegistry::in_memory()).await?;

    match &cli.command {
        Command::Store(cmd) => cmd.execute(&cache, format).await?,
        Command::Recall(cmd) => cmd.execute(&cache, format).await?,
        Command::Show(cmd) => cmd.execute(&cache, format).await?,
        Command::Consolidate(cmd) => cmd.execute(&cache, format).await?,
        Command::Stats(cmd) => cmd.execute(&cache, format).await?,
    }

    if cli.command.mutates() {
        cache.save_snapshot()?;
    }

    Ok(())
}
