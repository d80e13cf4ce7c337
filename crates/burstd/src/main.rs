//! burstd — the burstgrid daemon.
//!
//! Single binary that assembles the scheduler subsystems:
//! - Configuration (burstd.toml)
//! - Simulated cluster
//! - Target ranking
//! - Batch scheduler
//!
//! # Usage
//!
//! ```text
//! burstd run --config burstd.toml --cycles 10
//! burstd plan --config burstd.toml
//! burstd init > burstd.toml
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;

use crate::daemon::DaemonConfig;

#[derive(Parser)]
#[command(name = "burstd", about = "burstgrid batch scheduling daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run batch cycles against the simulated cluster.
    Run {
        /// Config file; defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stop after this many cycles.
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Print the next batch plan as JSON without launching anything.
    Plan {
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print a config file populated with defaults.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config, cycles } => {
            let config = DaemonConfig::load(config.as_deref())?;
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown signal received");
                    let _ = shutdown_tx.send(true);
                }
            });
            let result = daemon::run(config, cycles, shutdown_rx).await;
            ctrl_c.abort();
            result.map(|_| ())
        }
        Command::Plan { config } => {
            let config = DaemonConfig::load(config.as_deref())?;
            let summary = daemon::plan(&config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Init => {
            print!("{}", DaemonConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,burstd=debug,burstgrid_scheduler=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
