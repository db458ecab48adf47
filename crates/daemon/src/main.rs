//! connectd
//!
//! Device-side session endpoint with file transfer governance.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use connectd::config::{default_config_path, Config};
use connectd::limits::filetransfer::{DeviceCounters, RateTracker};
use tracing_subscriber::EnvFilter;

/// connectd - device-side endpoint for multiplexed remote sessions.
#[derive(Parser, Debug)]
#[command(name = "connectd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the daemon until interrupted
    Start {
        /// Seconds between telemetry log lines (0 disables them)
        #[arg(long, default_value = "60")]
        report_interval: u64,
    },

    /// Inspect or create the configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Validate the configuration
    Check,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    init_tracing(cli.verbose, &config.daemon.log_level);
    tracing::debug!("Using config file: {:?}", config_path);

    match cli.command {
        Commands::Start { report_interval } => {
            config.validate().context("Invalid configuration")?;
            run(config, Duration::from_secs(report_interval)).await?;
        }
        Commands::Config(ConfigCommands::Show) => {
            print!("{}", config.to_toml()?);
        }
        Commands::Config(ConfigCommands::Check) => match config.validate() {
            Ok(()) => println!("Configuration OK: {}", config_path.display()),
            Err(e) => {
                eprintln!("Configuration invalid: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Config(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists: {} (use --force to overwrite)",
                    config_path.display()
                );
            }
            Config::default().save(&config_path)?;
            println!("Wrote default configuration to {}", config_path.display());
        }
    }

    Ok(())
}

/// Initialise the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(verbose: bool, log_level: &str) {
    let level = if verbose { "debug" } else { log_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Run the rate tracker and report telemetry until a shutdown signal.
async fn run(config: Config, report_interval: Duration) -> anyhow::Result<()> {
    tracing::info!(
        idle_timeout_secs = config.session.idle_timeout_secs,
        limits_enabled = config.limits.enabled,
        "connectd starting"
    );

    let tracker = Arc::new(RateTracker::new(Arc::new(DeviceCounters::new())));
    tracker.start();

    let reporter = (!report_interval.is_zero()).then(|| {
        let tracker = Arc::clone(&tracker);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(report_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = tracker.counters().snapshot();
                tracing::info!(
                    tx_bytes = snapshot.tx_bytes,
                    rx_bytes = snapshot.rx_bytes,
                    tx_rate = snapshot.tx_rate,
                    rx_rate = snapshot.rx_rate,
                    tx_1m = snapshot.tx_avg.one,
                    rx_1m = snapshot.rx_avg.one,
                    period = snapshot.period,
                    "Transfer counters"
                );
            }
        })
    });

    wait_for_shutdown_signal().await?;

    if let Some(reporter) = reporter {
        reporter.abort();
    }
    tracker.stop().await;
    tracing::info!("connectd stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}
