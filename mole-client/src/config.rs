//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mole_core::{ConnectRequest, TargetType, TunnelResult};

use crate::connector::TlsOptions;

/// Parameters for one tunnel: where the endpoint is, who we are, and what the
/// endpoint should connect to.
#[derive(Clone)]
pub struct Config {
    pub endpoint_host: String,
    pub endpoint_port: u16,
    pub username: String,
    /// Only ever sent inside the handshake.
    pub password: String,
    pub target_host: String,
    pub target_port: u16,
    pub target_type: TargetType,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("endpoint_host", &self.endpoint_host)
            .field("endpoint_port", &self.endpoint_port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("target_host", &self.target_host)
            .field("target_port", &self.target_port)
            .field("target_type", &self.target_type)
            .finish()
    }
}

impl Config {
    /// The endpoint as `host:port`.
    pub fn endpoint_addr(&self) -> String {
        format!("{}:{}", self.endpoint_host, self.endpoint_port)
    }

    /// The target as `host:port`.
    pub fn target_addr(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }

    /// Build the connect request sent during the handshake.
    pub fn connect_request(&self) -> ConnectRequest {
        ConnectRequest {
            username: self.username.clone(),
            password: self.password.clone(),
            target_port: self.target_port,
            target_type: self.target_type,
            target_host: self.target_host.clone(),
        }
    }

    /// Reject values that cannot be encoded, before anything is dialed.
    pub fn validate(&self) -> TunnelResult<()> {
        self.connect_request().validate()
    }
}

/// Mole Client - Tunnel local TCP connections through a mole endpoint.
#[derive(Parser, Debug, Clone)]
#[command(name = "mole-client")]
#[command(author, version, about, long_about = None)]
pub struct ClientConfig {
    /// Local address to accept connections on
    #[arg(short, long, env = "MOLE_LISTEN", default_value = "127.0.0.1:1080")]
    pub listen: String,

    /// Endpoint hostname (also used for TLS server name verification)
    #[arg(short, long, env = "MOLE_SERVER")]
    pub server: String,

    /// Endpoint port
    #[arg(long, env = "MOLE_SERVER_PORT", default_value = "443")]
    pub server_port: u16,

    /// Username presented to the endpoint
    #[arg(short, long, env = "MOLE_USERNAME", default_value = "")]
    pub username: String,

    /// Password presented to the endpoint
    #[arg(long, env = "MOLE_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Target host or IP the endpoint should connect to
    #[arg(short, long, env = "MOLE_TARGET")]
    pub target: String,

    /// Target port
    #[arg(short = 'p', long, env = "MOLE_TARGET_PORT")]
    pub target_port: u16,

    /// Target address type tag, passed through to the endpoint
    #[arg(long, env = "MOLE_TARGET_TYPE", default_value = "1")]
    pub target_type: u8,

    /// PEM file with CA certificates to trust instead of the built-in roots
    #[arg(long, env = "MOLE_CA_FILE")]
    pub ca_file: Option<PathBuf>,

    /// Skip TLS certificate verification (insecure, for development only)
    #[arg(long, env = "MOLE_INSECURE")]
    pub insecure: bool,

    /// Timeout in seconds for TCP connect plus TLS handshake (0 = none)
    #[arg(long, env = "MOLE_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// Enable debug logging
    #[arg(long, env = "MOLE_DEBUG")]
    pub debug: bool,
}

impl ClientConfig {
    /// Tunnel parameters shared by every accepted connection.
    pub fn tunnel_config(&self) -> Config {
        Config {
            endpoint_host: self.server.clone(),
            endpoint_port: self.server_port,
            username: self.username.clone(),
            password: self.password.clone(),
            target_host: self.target.clone(),
            target_port: self.target_port,
            target_type: TargetType(self.target_type),
        }
    }

    pub fn tls_options(&self) -> TlsOptions {
        TlsOptions {
            ca_file: self.ca_file.clone(),
            insecure: self.insecure,
            connect_timeout: match self.connect_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}
