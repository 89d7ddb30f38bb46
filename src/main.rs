//! # FitTracker Gateway - Main Entry Point
//!
//! Loads configuration, installs logging, builds the gateway and serves it
//! until SIGINT or SIGTERM.

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use fittracker_gateway::observability::init_logging;
use fittracker_gateway::{GatewayConfig, GatewayServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("GATEWAY_CONFIG_PATH").unwrap_or_else(|_| "config/gateway.yaml".to_string());

    let config = GatewayConfig::load_from_file(&config_path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), config = %config_path, "Starting FitTracker gateway");

    let server = GatewayServer::new(config).context("Failed to build gateway")?;

    if let Err(e) = server.start(shutdown_signal()).await {
        error!(error = %e, "Gateway terminated with error");
        return Err(e.into());
    }

    info!("Gateway shutdown complete");
    Ok(())
}

/// Resolves on the first SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
