//! Client side of the mole tunnel.
//!
//! [`Client::connect`] dials an endpoint over TLS and performs the connect
//! handshake; the resulting handle is bound to a local connection with
//! [`Client::bind`], which relays bytes until either side hangs up.

pub mod client;
pub mod config;
pub mod connector;
pub mod forward;
pub mod handshake;

pub use client::Client;
pub use config::{ClientConfig, Config};
pub use connector::{EndpointConnector, TlsOptions};
pub use handshake::{Handshake, HandshakeState};
