//! Endpoint configuration.

use clap::Parser;

/// Mole Server - Tunnel endpoint that connects clients to their targets.
#[derive(Parser, Debug, Clone)]
#[command(name = "mole-server")]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Port to accept TLS tunnel connections on
    #[arg(short, long, env = "MOLE_PORT", default_value = "443")]
    pub port: u16,

    /// Path to TLS certificate chain (PEM format)
    #[arg(short, long, env = "MOLE_CERT")]
    pub cert: String,

    /// Path to TLS private key (PEM format)
    #[arg(short, long, env = "MOLE_KEY")]
    pub key: String,

    /// Require clients to present the configured username and password
    #[arg(long, env = "MOLE_AUTH")]
    pub auth: bool,

    /// Accepted username when --auth is set
    #[arg(short, long, env = "MOLE_USERNAME", default_value = "")]
    pub username: String,

    /// Accepted password when --auth is set
    #[arg(long, env = "MOLE_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Enable debug logging
    #[arg(long, env = "MOLE_DEBUG")]
    pub debug: bool,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// The credential pair clients must match, if authorization is on.
    pub fn credentials(&self) -> Option<Credentials> {
        self.auth.then(|| Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}

/// A single accepted username/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn matches(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password == password
    }
}
