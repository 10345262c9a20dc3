//! Mole Server - Tunnel endpoint component.
//!
//! Accepts TLS connections from mole clients, connects each one to the target
//! it asks for, and relays bytes in both directions.

mod config;
mod endpoint;
mod tls;

use anyhow::Result;
use clap::Parser;
use config::ServerConfig;
use endpoint::Endpoint;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration
    let config = ServerConfig::parse();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(if config.debug {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting mole-server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Authorization: {}",
        if config.auth { "enabled" } else { "disabled" }
    );

    let acceptor = tls::load_acceptor(&config.cert, &config.key)?;
    let handler = Arc::new(Endpoint::new(config.credentials()));

    let addr = config.listen_addr();
    tokio::select! {
        result = endpoint::run_server(&addr, acceptor, handler) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
    }

    Ok(())
}
