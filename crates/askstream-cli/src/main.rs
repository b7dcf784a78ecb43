use std::path::PathBuf;

use askstream::config::Config;
use askstream::history::LanceHistoryStore;
use askstream_cli::commands::{AskCommand, HistoryCommand};
use askstream_cli::error::CliResult;
use askstream_cli::logging::init_logging;
use askstream_cli::output::OutputFormat;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "askstream-cli")]
#[command(about = "askstream CLI - ask questions and browse history")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Ask a question and stream the answer")]
    Ask(AskCommand),

    #[clap(about = "Show recent questions and answers")]
    History(HistoryCommand),
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
    init_logging();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let config = Config::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Ask(cmd) => {
            let server = cmd
                .server
                .clone()
                .unwrap_or_else(|| format!("http://{}", config.server.listen_addr));
            cmd.execute(&server, format).await
        }
        Command::History(cmd) => {
            let data_dir = cli
                .data_dir
                .clone()
                .unwrap_or_else(|| config.history.data_dir.clone());
            let store = LanceHistoryStore::open(&data_dir).await?;
            cmd.execute(&store, format).await
        }
    }
}
