use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{stdin, stdout, BufReader};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::{LogFormat, TollgateConfig};
use tollgate::gate::{replay, AdmissionGate, ClientKeyResolver};
use tollgate::ratelimit::PolicyTiers;

/// Per-client admission control for web backends.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// YAML configuration file; `TOLLGATE__*` environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format, overriding the configuration
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and print the resolved tiers as JSON
    Validate,
    /// Read `<tier> <client-key>` lines from stdin and print each decision
    Replay,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = TollgateConfig::load(cli.config.as_deref())?;
    let format = cli.log_format.map(LogFormat::from).unwrap_or(config.logging.format);
    init_tracing(&config.logging.level, format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Build every tier before anything is checked; bad values stop here.
    let tiers = Arc::new(PolicyTiers::from_config(&config.rate_limits)?);
    info!("Policy tiers initialized");

    match cli.command {
        Command::Validate => {
            println!("{}", serde_json::to_string_pretty(&tiers.summaries())?);
        }
        Command::Replay => {
            let resolver = ClientKeyResolver::new(&config.client_key);
            let gate = AdmissionGate::new(tiers.clone(), resolver);
            let reapers = tiers.start_reapers();

            tokio::select! {
                result = replay(&gate, BufReader::new(stdin()), stdout()) => {
                    let stats = result?;
                    info!(allowed = stats.allowed, denied = stats.denied, "Input exhausted");
                }
                _ = shutdown_signal() => {}
            }

            reapers.shutdown().await;
        }
    }

    info!("Tollgate stopped");
    Ok(())
}

/// Initialize tracing; `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
