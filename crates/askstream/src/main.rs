//! askstream daemon - streams LLM answers to clients and records them

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use askstream::AskStreamError;
use askstream::config::Config;
use askstream::error::Result;
use askstream::history::{HistorySink, InMemoryHistory, LanceHistoryStore};
use askstream::relay::{ChatCompletionsClient, CompletionUpstream, RelayServer};

/// askstream - relay questions to an LLM and stream the answer back
#[derive(Parser)]
#[command(name = "askstream")]
#[command(about = "A streaming relay between clients and an LLM completion endpoint")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the relay server (default command)
    #[command(name = "serve")]
    Serve {
        /// Keep history in memory only; nothing is written to disk
        #[arg(long)]
        ephemeral: bool,
    },
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
        None => serve(cli.config, false).await,
        Some(Command::Serve { ephemeral }) => serve(cli.config, ephemeral).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,askstream=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn open_history(config: &Config, ephemeral: bool) -> Result<Arc<dyn HistorySink>> {
    if ephemeral {
        tracing::warn!("Ephemeral mode: history is kept in memory and lost on exit");
        return Ok(Arc::new(InMemoryHistory::new()));
    }

    let data_dir = &config.history.data_dir;
    tracing::info!("Initializing history storage at: {}", data_dir.display());

    std::fs::create_dir_all(data_dir).map_err(|e| {
        AskStreamError::Storage(format!(
            "Failed to create data directory {}: {}",
            data_dir.display(),
            e
        ))
    })?;

    let store = LanceHistoryStore::open(data_dir).await?;
    Ok(Arc::new(store))
}

async fn serve(config_path: Option<PathBuf>, ephemeral: bool) -> Result<()> {
    tracing::info!("Starting askstream daemon");

    let config = Config::load(config_path.as_deref())?;
    tracing::debug!("Config loaded: {:?}", config);

    // Credentials are checked before anything listens
    let upstream: Arc<dyn CompletionUpstream> =
        Arc::new(ChatCompletionsClient::from_env(&config.upstream)?);

    let history = open_history(&config, ephemeral).await?;

    let server = RelayServer::new(
        config.server.clone(),
        upstream,
        history,
        Duration::from_secs(config.upstream.idle_timeout_secs),
    );

    server.serve().await?;

    tracing::info!("askstream daemon stopped");
    Ok(())
}
