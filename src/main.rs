//! Standalone driver process: connects to the runnerd daemon, owns the
//! session bootstrap, and logs fingerprint reports until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use runnerd_driver::config::DriverConfig;
use runnerd_driver::daemon::DaemonClient;
use runnerd_driver::driver::{HealthState, RunnerdDriver};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runnerd-driver")]
#[command(about = "Task driver bridging a cluster scheduler to the runnerd execution daemon")]
#[command(version)]
struct Cli {
    /// Driver configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Unix socket path of the daemon (overrides the config file)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// TCP address of the daemon (overrides the config file)
    #[arg(long)]
    address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig::default(),
    };
    if cli.socket.is_some() {
        config.daemon_socket = cli.socket;
    }
    if cli.address.is_some() {
        config.daemon_address = cli.address;
    }

    let client = DaemonClient::connect(&config)
        .await
        .context("failed to connect to the runnerd daemon")?;
    let driver = RunnerdDriver::new(config, Arc::new(client));

    // Eager bootstrap; failures here are reported through the fingerprint.
    driver.configure().await;

    let mut reports = driver.fingerprints();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received");
                break;
            }
            report = reports.recv() => {
                let Some(report) = report else { break };
                match report.health {
                    HealthState::Healthy => {
                        tracing::info!(health = %report.health, "{}", report.message);
                    }
                    HealthState::Undetected | HealthState::Unhealthy => {
                        tracing::warn!(health = %report.health, "{}", report.message);
                    }
                }
            }
        }
    }

    driver.shutdown().await;
    Ok(())
}
