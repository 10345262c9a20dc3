//! TLS dialing of the tunnel endpoint.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mole_core::{TunnelError, TunnelResult};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

/// How to establish the encrypted transport.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// CA bundle to trust instead of the webpki roots.
    pub ca_file: Option<PathBuf>,
    /// Accept any server certificate.
    pub insecure: bool,
    /// Bound on TCP connect plus TLS handshake.
    pub connect_timeout: Option<Duration>,
}

/// Dials the endpoint and wraps the socket in TLS.
#[derive(Clone)]
pub struct EndpointConnector {
    tls: tokio_rustls::TlsConnector,
    connect_timeout: Option<Duration>,
}

impl EndpointConnector {
    /// Build a connector from TLS options.
    pub fn new(options: &TlsOptions) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?;

        let config = if options.insecure {
            warn!("TLS certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
                .with_no_client_auth()
        } else {
            builder
                .with_root_certificates(build_root_store(options.ca_file.as_deref())?)
                .with_no_client_auth()
        };

        Ok(Self {
            tls: tokio_rustls::TlsConnector::from(Arc::new(config)),
            connect_timeout: options.connect_timeout,
        })
    }

    /// Open a TLS connection to `host:port`, using `host` for SNI.
    ///
    /// Every failure, including a timeout, is reported as
    /// [`TunnelError::DialFailure`].
    pub async fn connect(&self, host: &str, port: u16) -> TunnelResult<TlsStream<TcpStream>> {
        let endpoint = format!("{}:{}", host, port);
        let dial_failure = |source: io::Error| TunnelError::DialFailure {
            endpoint: endpoint.clone(),
            source,
        };

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| dial_failure(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let dial = async {
            let stream = TcpStream::connect((host, port)).await?;
            stream.set_nodelay(true)?;
            debug!("TCP connected to {}, starting TLS handshake", endpoint);
            self.tls.connect(server_name, stream).await
        };

        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, dial)
                .await
                .map_err(|_| dial_failure(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")))?,
            None => dial.await,
        }
        .map_err(dial_failure)?;

        debug!("TLS established with {}", endpoint);
        Ok(stream)
    }
}

fn build_root_store(ca_file: Option<&Path>) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();

    match ca_file {
        Some(path) => {
            for cert in load_certs(path)? {
                root_store.add(cert)?;
            }
            info!("Trusting {} CA certificate(s) from {}", root_store.len(), path.display());
        }
        None => root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    Ok(root_store)
}

/// Load certificates from a PEM file.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {}", path.display());
    }
    Ok(certs)
}

/// Accepts any server certificate. Only reachable through `--insecure`.
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
