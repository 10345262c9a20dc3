//! Tunnel client handle.

use mole_core::{relay, EncryptedStream, RelayReport, TunnelResult};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info};

use crate::config::Config;
use crate::connector::EndpointConnector;
use crate::handshake::Handshake;

/// An established tunnel to a target, ready to be bound to a local
/// connection.
///
/// A `Client` only exists once the endpoint has accepted the connect request.
/// It is single use: [`bind`](Client::bind) consumes it.
pub struct Client<S = TlsStream<TcpStream>> {
    endpoint: S,
    config: Config,
    message: String,
}

impl Client {
    /// Dial the endpoint over TLS and run the connect handshake.
    pub async fn connect(config: Config, connector: &EndpointConnector) -> TunnelResult<Self> {
        config.validate()?;

        debug!("Dialing endpoint {}", config.endpoint_addr());
        let stream = connector
            .connect(&config.endpoint_host, config.endpoint_port)
            .await?;

        Self::handshake(stream, config).await
    }
}

impl<S> Client<S>
where
    S: EncryptedStream + 'static,
{
    /// Run the connect handshake over a stream that is already established.
    pub async fn handshake(stream: S, config: Config) -> TunnelResult<Self> {
        let request = config.connect_request();
        let (endpoint, message) = Handshake::new(stream).run(&request).await?;

        info!(
            "Tunnel to {} established via {} as {:?}",
            config.target_addr(),
            config.endpoint_addr(),
            config.username
        );
        if !message.is_empty() {
            debug!("Endpoint says: {}", message);
        }

        Ok(Self {
            endpoint,
            config,
            message,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The informational message the endpoint sent with its acceptance.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Relay bytes between `local` and the tunnel until either side closes.
    ///
    /// Both connections are closed when this returns.
    pub async fn bind<L>(self, local: L) -> RelayReport
    where
        L: AsyncRead + AsyncWrite + Send + 'static,
    {
        let target = self.config.target_addr();
        let report = relay(local, self.endpoint).await;
        debug!(
            "Relay to {} finished: sent {} bytes, received {} bytes",
            target,
            report.outbound.bytes(),
            report.inbound.bytes()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mole_core::{AssumeEncrypted, DirectionOutcome, TargetType, TunnelError};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn bob_config() -> Config {
        Config {
            endpoint_host: "tunnel.example.com".to_string(),
            endpoint_port: 443,
            username: "bob".to_string(),
            password: "pw".to_string(),
            target_host: "example.com".to_string(),
            target_port: 80,
            target_type: TargetType(1),
        }
    }

    /// Reads the 23-byte request for `bob_config` and answers with `reply`.
    async fn mock_endpoint(mut peer: DuplexStream, reply: &'static [u8]) -> DuplexStream {
        let mut request = vec![0u8; 23];
        peer.read_exact(&mut request).await.unwrap();

        let mut expected = vec![0x01, 0x03, b'b', b'o', b'b', 0x02, b'p', b'w', 0x00, 0x50, 0x01, 0x0b];
        expected.extend_from_slice(b"example.com");
        assert_eq!(request, expected);

        peer.write_all(reply).await.unwrap();
        peer
    }

    #[tokio::test]
    async fn test_client_established_and_bind() {
        let (stream, peer) = duplex(4096);
        let endpoint = tokio::spawn(mock_endpoint(peer, &[0x01, 0x00, 0x00]));

        let client = Client::handshake(AssumeEncrypted::new(stream), bob_config())
            .await
            .unwrap();
        assert_eq!(client.message(), "");
        assert_eq!(client.config().target_addr(), "example.com:80");

        let mut endpoint_peer = endpoint.await.unwrap();
        let (local, mut local_peer) = duplex(4096);
        let bind = tokio::spawn(client.bind(local));

        local_peer.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        let mut buf = vec![0u8; 18];
        endpoint_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET / HTTP/1.0\r\n\r\n");

        endpoint_peer.write_all(b"HTTP/1.0 200 OK\r\n").await.unwrap();
        let mut buf = vec![0u8; 17];
        local_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"HTTP/1.0 200 OK\r\n");

        drop(local_peer);
        let report = tokio::time::timeout(Duration::from_secs(5), bind)
            .await
            .expect("bind did not return")
            .unwrap();
        assert!(matches!(report.outbound, DirectionOutcome::Finished { bytes: 18 }));
        assert!(report.is_clean());

        let mut rest = Vec::new();
        endpoint_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_client_remote_rejected() {
        let (stream, peer) = duplex(4096);
        let endpoint = tokio::spawn(mock_endpoint(peer, &[0x01, 0x01, 0x00]));

        let result = Client::handshake(AssumeEncrypted::new(stream), bob_config()).await;
        assert!(matches!(result, Err(TunnelError::RemoteRejected { code: 0x01 })));

        let mut endpoint_peer = endpoint.await.unwrap();
        let mut rest = Vec::new();
        endpoint_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_connect_rejects_oversized_config_before_dialing() {
        let connector = EndpointConnector::new(&Default::default()).unwrap();
        let config = Config {
            // Unresolvable on purpose: a dial attempt would surface as DialFailure.
            endpoint_host: "mole.invalid".to_string(),
            target_host: "h".repeat(256),
            ..bob_config()
        };

        let result = Client::connect(config, &connector).await;
        assert!(matches!(
            result,
            Err(TunnelError::ValueTooLarge { field: "target host", len: 256 })
        ));
    }
}
