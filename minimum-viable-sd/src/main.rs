mod collector;
mod config;
mod net;
mod reconciler;
mod store;

use std::path::PathBuf;
use std::process::ExitCode;
use clap::{error::ErrorKind, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use crate::config::Config;

const USAGE: &str = "
Usage:
	prometheus-minimum-viable-sd announce <path> <address:port>
		Reads a service definition JSON file [1] and announces it to the
		given collector every 30 seconds.

	prometheus-minimum-viable-sd collect <path> <address:port>
		Listens on the given TCP address/port for service definitions, and
		collects all live service definitions as JSON [1] into the given file.

Options:
	--config <path>   TOML file overriding intervals, timeouts and limits

Environment:
	DEBUG=true        log announcements, garbage collection and file writes
	RUST_LOG          tracing filter, takes precedence over DEBUG

[1]: https://prometheus.io/docs/prometheus/latest/configuration/configuration/#file_sd_config

";

#[derive(Debug, Parser)]
#[command(
    name = "prometheus-minimum-viable-sd",
    disable_version_flag = true,
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Announce a service definition file to a collector
    Announce { path: PathBuf, address: String },
    /// Collect announcements into a file_sd output file
    Collect { path: PathBuf, address: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.kind() == ErrorKind::DisplayHelp => {
            eprint!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        Err(_) => {
            eprint!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(config::debug_from_env());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "prometheus_minimum_viable_sd=debug"
    } else {
        "prometheus_minimum_viable_sd=info"
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter))
        )
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    // Ctrl-C cancels every long-lived task
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                signal_cancel.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
        }
    });

    match cli.command {
        Command::Announce { path, address } => {
            let payload = net::announce::load_announcement(&path)?;
            tracing::info!("Announcing to {} every {}s", address, config.announcer.interval_secs);
            net::announce::run_announcer(payload, address, config.announcer, cancel).await?;
        }
        Command::Collect { path, address } => {
            tracing::info!("Collecting announcements into {}", path.display());
            collector::collect(&path, &address, config.collector, cancel).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
