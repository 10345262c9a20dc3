//! Endpoint side of the connect handshake and the target relay.

use std::sync::Arc;

use anyhow::{Context, Result};
use mole_core::protocol::MAX_FIELD_LEN;
use mole_core::{
    accept_with_backoff, relay, ConnectRequest, ConnectResponse, ConnectionId, EncryptedStream,
    RelayReport,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::config::Credentials;

/// Status sent when the credentials do not match.
pub const STATUS_UNAUTHORIZED: u8 = 0x01;
/// Status sent when the target could not be reached.
pub const STATUS_TARGET_UNREACHABLE: u8 = 0x02;

/// What happened to an accepted tunnel connection.
#[derive(Debug)]
pub enum Outcome {
    /// The request was accepted and relayed until one side closed.
    Relayed(RelayReport),
    /// The request was answered with a nonzero status.
    Rejected { status: u8 },
}

/// Handles connect requests.
pub struct Endpoint {
    credentials: Option<Credentials>,
}

impl Endpoint {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self { credentials }
    }

    /// Serve one tunnel connection: read the request, answer it, and relay to
    /// the target on success. The stream is closed on return.
    pub async fn handle<S>(&self, mut stream: S, id: ConnectionId) -> Result<Outcome>
    where
        S: EncryptedStream + 'static,
    {
        let request = ConnectRequest::read_from(&mut stream)
            .await
            .context("Failed to read connect request")?;
        debug!(
            "[{}] {:?} requests {}:{} (type {})",
            id, request.username, request.target_host, request.target_port, request.target_type
        );

        if let Some(credentials) = &self.credentials {
            if !credentials.matches(&request.username, &request.password) {
                warn!("[{}] Rejected credentials for {:?}", id, request.username);
                return reject(stream, STATUS_UNAUTHORIZED, "authentication failed").await;
            }
        }

        let target_addr = (request.target_host.as_str(), request.target_port);
        let target = match TcpStream::connect(target_addr).await {
            Ok(target) => target,
            Err(e) => {
                warn!(
                    "[{}] Target {}:{} unreachable: {}",
                    id, request.target_host, request.target_port, e
                );
                return reject(stream, STATUS_TARGET_UNREACHABLE, &e.to_string()).await;
            }
        };
        let _ = target.set_nodelay(true);

        let response = ConnectResponse::ok().encode()?;
        stream
            .write_all(&response)
            .await
            .context("Failed to write connect response")?;
        stream.flush().await?;

        info!(
            "[{}] Tunnel to {}:{} open",
            id, request.target_host, request.target_port
        );
        Ok(Outcome::Relayed(relay(stream, target).await))
    }
}

async fn reject<S>(mut stream: S, status: u8, message: &str) -> Result<Outcome>
where
    S: EncryptedStream,
{
    let response = ConnectResponse::rejected(status, truncate(message, MAX_FIELD_LEN));
    stream.write_all(&response.encode()?).await?;
    let _ = stream.shutdown().await;
    Ok(Outcome::Rejected { status })
}

/// Cut `s` to at most `max` bytes on a character boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Accept TLS connections and serve each on its own task. Only fails if the
/// listener cannot be bound.
pub async fn run_server(addr: &str, acceptor: TlsAcceptor, endpoint: Arc<Endpoint>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to listen on {}", addr))?;
    info!("Endpoint listening on {}", addr);

    let listener = &listener;
    loop {
        let (stream, peer) = accept_with_backoff(move || listener.accept()).await;
        let acceptor = acceptor.clone();
        let endpoint = endpoint.clone();

        tokio::spawn(async move {
            let id = ConnectionId::new();
            debug!("[{}] Accepted {}", id, peer);

            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("[{}] TLS handshake with {} failed: {}", id, peer, e);
                    return;
                }
            };

            match endpoint.handle(stream, id).await {
                Ok(Outcome::Relayed(report)) => info!(
                    "[{}] {} closed: {} bytes up, {} bytes down",
                    id,
                    peer,
                    report.outbound.bytes(),
                    report.inbound.bytes()
                ),
                Ok(Outcome::Rejected { status }) => {
                    debug!("[{}] {} rejected with status 0x{:02x}", id, peer, status)
                }
                Err(e) => warn!("[{}] {}: {:#}", id, peer, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mole_client::{Client, Config, EndpointConnector, TlsOptions};
    use mole_core::{AssumeEncrypted, TargetType, TunnelError};
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    fn client_config(target_port: u16) -> Config {
        Config {
            endpoint_host: "localhost".to_string(),
            endpoint_port: 443,
            username: "bob".to_string(),
            password: "pw".to_string(),
            target_host: "127.0.0.1".to_string(),
            target_port,
            target_type: TargetType(1),
        }
    }

    async fn echo_target() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (mut rd, mut wr) = stream.split();
            let _ = tokio::io::copy(&mut rd, &mut wr).await;
        });
        port
    }

    #[tokio::test]
    async fn test_end_to_end_relay() {
        let port = echo_target().await;
        let (client_side, endpoint_side) = duplex(4096);

        let endpoint = Endpoint::new(Some(Credentials {
            username: "bob".to_string(),
            password: "pw".to_string(),
        }));
        let served = tokio::spawn(async move {
            endpoint
                .handle(AssumeEncrypted::new(endpoint_side), ConnectionId::new())
                .await
        });

        let client = Client::handshake(AssumeEncrypted::new(client_side), client_config(port))
            .await
            .unwrap();

        let (local, mut local_peer) = duplex(4096);
        let bind = tokio::spawn(client.bind(local));

        local_peer.write_all(b"through the tunnel").await.unwrap();
        let mut buf = [0u8; 18];
        local_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"through the tunnel");

        drop(local_peer);
        let report = tokio::time::timeout(Duration::from_secs(5), bind)
            .await
            .expect("bind did not return")
            .unwrap();
        assert_eq!(report.outbound.bytes(), 18);
        assert_eq!(report.inbound.bytes(), 18);

        let outcome = tokio::time::timeout(Duration::from_secs(5), served)
            .await
            .expect("endpoint did not finish")
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Outcome::Relayed(_)));
    }

    #[tokio::test]
    async fn test_wrong_credentials_rejected() {
        let (client_side, endpoint_side) = duplex(4096);
        let endpoint = Endpoint::new(Some(Credentials {
            username: "bob".to_string(),
            password: "secret".to_string(),
        }));
        let served = tokio::spawn(async move {
            endpoint
                .handle(AssumeEncrypted::new(endpoint_side), ConnectionId::new())
                .await
        });

        let result = Client::handshake(AssumeEncrypted::new(client_side), client_config(9)).await;
        assert!(matches!(
            result,
            Err(TunnelError::RemoteRejected { code: STATUS_UNAUTHORIZED })
        ));

        let outcome = served.await.unwrap().unwrap();
        assert!(matches!(outcome, Outcome::Rejected { status: STATUS_UNAUTHORIZED }));
    }

    #[tokio::test]
    async fn test_unreachable_target_rejected() {
        let placeholder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_port = placeholder.local_addr().unwrap().port();
        drop(placeholder);

        let (endpoint_side, mut client_peer) = duplex(4096);
        let endpoint = Endpoint::new(None);
        let served = tokio::spawn(async move {
            endpoint
                .handle(AssumeEncrypted::new(endpoint_side), ConnectionId::new())
                .await
        });

        let request = client_config(dead_port).connect_request().encode().unwrap();
        client_peer.write_all(&request).await.unwrap();

        let response = ConnectResponse::read_from(&mut client_peer).await.unwrap();
        assert_eq!(response.status, STATUS_TARGET_UNREACHABLE);
        assert!(!response.message.is_empty());

        let outcome = served.await.unwrap().unwrap();
        assert!(matches!(outcome, Outcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_bad_version_closes_silently() {
        let (endpoint_side, mut peer) = duplex(4096);
        let endpoint = Endpoint::new(None);
        let served = tokio::spawn(async move {
            endpoint
                .handle(AssumeEncrypted::new(endpoint_side), ConnectionId::new())
                .await
        });

        peer.write_all(&[0x09, 0x00]).await.unwrap();

        let err = served.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TunnelError>(),
            Some(TunnelError::VersionMismatch(0x09))
        ));

        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    /// Self-signed certificate for `localhost`, written as PEM files.
    fn write_localhost_cert(tag: &str) -> (PathBuf, PathBuf) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = std::env::temp_dir();
        let cert_path = dir.join(format!("mole-{}-{}.crt", tag, std::process::id()));
        let key_path = dir.join(format!("mole-{}-{}.key", tag, std::process::id()));
        std::fs::write(&cert_path, cert.serialize_pem().unwrap()).unwrap();
        std::fs::write(&key_path, cert.serialize_private_key_pem()).unwrap();
        (cert_path, key_path)
    }

    /// Accept one TLS connection on a fresh port and hand it to an endpoint.
    async fn tls_endpoint(
        cert_path: &Path,
        key_path: &Path,
    ) -> (u16, tokio::task::JoinHandle<Result<Outcome>>) {
        let acceptor =
            crate::tls::load_acceptor(cert_path.to_str().unwrap(), key_path.to_str().unwrap())
                .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let served = tokio::spawn(async move {
            let (stream, _) = listener.accept().await?;
            let stream = acceptor.accept(stream).await?;
            let endpoint = Endpoint::new(Some(Credentials {
                username: "bob".to_string(),
                password: "pw".to_string(),
            }));
            endpoint.handle(stream, ConnectionId::new()).await
        });
        (port, served)
    }

    #[tokio::test]
    async fn test_client_connect_over_tls() {
        let (cert_path, key_path) = write_localhost_cert("trusted");
        let target_port = echo_target().await;
        let (endpoint_port, served) = tls_endpoint(&cert_path, &key_path).await;

        let connector = EndpointConnector::new(&TlsOptions {
            ca_file: Some(cert_path.clone()),
            insecure: false,
            connect_timeout: Some(Duration::from_secs(5)),
        })
        .unwrap();
        let config = Config {
            endpoint_host: "localhost".to_string(),
            endpoint_port,
            ..client_config(target_port)
        };

        let client = Client::connect(config, &connector).await.unwrap();
        let (local, mut local_peer) = duplex(4096);
        let bind = tokio::spawn(client.bind(local));

        local_peer.write_all(b"over real tls").await.unwrap();
        let mut buf = [0u8; 13];
        local_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"over real tls");

        drop(local_peer);
        let report = tokio::time::timeout(Duration::from_secs(10), bind)
            .await
            .expect("bind did not return")
            .unwrap();
        assert_eq!(report.outbound.bytes(), 13);
        assert_eq!(report.inbound.bytes(), 13);

        let outcome = tokio::time::timeout(Duration::from_secs(10), served)
            .await
            .expect("endpoint did not finish")
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Outcome::Relayed(_)));

        std::fs::remove_file(&cert_path).unwrap();
        std::fs::remove_file(&key_path).unwrap();
    }

    #[tokio::test]
    async fn test_client_rejects_untrusted_certificate() {
        let (cert_path, key_path) = write_localhost_cert("untrusted");
        let (endpoint_port, served) = tls_endpoint(&cert_path, &key_path).await;

        // Webpki roots only: the self-signed certificate is not trusted.
        let connector = EndpointConnector::new(&TlsOptions {
            connect_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        })
        .unwrap();
        let config = Config {
            endpoint_host: "localhost".to_string(),
            endpoint_port,
            ..client_config(9)
        };

        let result = Client::connect(config, &connector).await;
        assert!(matches!(result, Err(TunnelError::DialFailure { .. })));
        assert!(served.await.unwrap().is_err());

        std::fs::remove_file(&cert_path).unwrap();
        std::fs::remove_file(&key_path).unwrap();
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 255), "short");
        assert_eq!(truncate(&"a".repeat(300), 255).len(), 255);
        // 'é' is two bytes; never split it
        assert_eq!(truncate("éé", 3), "é");
    }
}
