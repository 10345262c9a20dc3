//! TLS configuration and certificate loading.

use anyhow::{Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

/// Build the endpoint's TLS acceptor from a PEM certificate chain and key.
pub fn load_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .with_context(|| format!("{} does not match {}", key_path, cert_path))?;

    info!("TLS ready with certificate {}", cert_path);
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Certificate chain from a PEM file, leaf first. A malformed PEM block fails
/// the whole load.
fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open_pem(path)?;
    let chain = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Malformed certificate in {}", path))?;

    if chain.is_empty() {
        anyhow::bail!("No certificates found in {}", path);
    }

    info!("Loaded {} certificate(s) from {}", chain.len(), path);
    Ok(chain)
}

/// First private key (PKCS#1, PKCS#8 or SEC1) in a PEM file.
fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open_pem(path)?;
    private_key(&mut reader)
        .with_context(|| format!("Malformed private key in {}", path))?
        .ok_or_else(|| anyhow::anyhow!("No private key found in {}", path))
}

fn open_pem(path: &str) -> Result<BufReader<File>> {
    let file = File::open(Path::new(path)).with_context(|| format!("Failed to open {}", path))?;
    Ok(BufReader::new(file))
}
