//! Domus Controller
//!
//! Polls field bus points and dispatches their events to subscribers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use domus::config::Settings;
use domus::station::ModbusStation;

/// Domus Field Bus Controller
#[derive(Parser, Debug)]
#[command(name = "domus")]
#[command(about = "Domus Field Bus Controller", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "domus.toml")]
    config: PathBuf,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    log: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = match &args.log {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("Invalid log filter: {directives}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("domus=info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if args.check {
        println!(
            "{}: {} bus(es), {} point(s) OK",
            args.config.display(),
            settings.buses.len(),
            settings.points.len()
        );
        return Ok(());
    }

    info!("Starting Domus v{}", env!("CARGO_PKG_VERSION"));

    let mut station = ModbusStation::modbus(settings)?;
    station.start()?;

    shutdown_signal().await;

    info!("Shutting down buses...");
    station.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
