//! Core types for the mole tunnel.
//!
//! Shared by the tunnel client and the endpoint: the connect handshake wire
//! format, the error taxonomy, the encrypted-transport marker and the byte
//! relay that runs once a tunnel is up.

pub mod accept;
pub mod error;
pub mod id;
pub mod protocol;
pub mod relay;
pub mod transport;

pub use accept::accept_with_backoff;
pub use error::{ErrorCategory, TunnelError, TunnelResult};
pub use id::ConnectionId;
pub use protocol::{ConnectRequest, ConnectResponse, TargetType, STATUS_OK, VER01};
pub use relay::{relay, DirectionOutcome, RelayReport};
pub use transport::{AssumeEncrypted, EncryptedStream};
