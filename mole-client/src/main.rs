//! Mole Client - Tunnel client component.
//!
//! Listens locally and forwards every accepted connection through the
//! endpoint to the configured target.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mole_client::forward::run_listener;
use mole_client::{ClientConfig, EndpointConnector};
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration
    let config = ClientConfig::parse();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(if config.debug {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_target(false)
        .init();

    info!("Starting mole-client v{}", env!("CARGO_PKG_VERSION"));

    let tunnel = config.tunnel_config();
    tunnel.validate().context("Invalid tunnel configuration")?;
    info!("Endpoint: {}", tunnel.endpoint_addr());
    info!("Target: {} (type {})", tunnel.target_addr(), tunnel.target_type);

    let connector = EndpointConnector::new(&config.tls_options())
        .context("Failed to build TLS configuration")?;

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen))?;
    info!("Listening on {}", listener.local_addr()?);

    tokio::select! {
        _ = run_listener(listener, Arc::new(tunnel), Arc::new(connector)) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
