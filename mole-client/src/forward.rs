//! Local listener that tunnels every accepted connection.
//!
//! Each accepted connection gets its own tunnel: a fresh TLS dial, a fresh
//! handshake, then a relay. A failure only affects the connection it happened
//! on; the listener keeps accepting.

use std::net::SocketAddr;
use std::sync::Arc;

use mole_core::{accept_with_backoff, ConnectionId};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::config::Config;
use crate::connector::EndpointConnector;

/// Accept connections forever. Accept errors are logged and retried.
pub async fn run_listener(
    listener: TcpListener,
    config: Arc<Config>,
    connector: Arc<EndpointConnector>,
) {
    let listener = &listener;
    loop {
        let (stream, peer) = accept_with_backoff(move || listener.accept()).await;
        let config = config.clone();
        let connector = connector.clone();
        tokio::spawn(async move {
            serve_connection(stream, peer, &config, &connector).await;
        });
    }
}

/// Tunnel a single local connection. The connection is closed on return.
pub async fn serve_connection(
    local: TcpStream,
    peer: SocketAddr,
    config: &Config,
    connector: &EndpointConnector,
) {
    let id = ConnectionId::new();
    debug!("[{}] Accepted {}", id, peer);

    if let Err(e) = local.set_nodelay(true) {
        debug!("[{}] Failed to set TCP_NODELAY: {}", id, e);
    }

    let client = match Client::connect(config.clone(), connector).await {
        Ok(client) => client,
        Err(e) => {
            if e.is_retryable() {
                warn!("[{}] Tunnel for {} failed: {}", id, peer, e);
            } else {
                error!("[{}] Tunnel for {} failed ({}): {}", id, peer, e.category(), e);
            }
            return;
        }
    };

    let report = client.bind(local).await;
    if report.is_clean() {
        info!(
            "[{}] {} closed: {} bytes up, {} bytes down",
            id,
            peer,
            report.outbound.bytes(),
            report.inbound.bytes()
        );
    } else {
        warn!(
            "[{}] {} closed with errors: up {}, down {}",
            id, peer, report.outbound, report.inbound
        );
    }
}
