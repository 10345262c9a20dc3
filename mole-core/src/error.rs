//! Error types for the tunnel handshake.
//!
//! Every failure the handshake can hit is a distinct variant so callers can
//! tell a bad credential from a dead network, and each variant is grouped into
//! a coarse [`ErrorCategory`] for logging.

use std::fmt;
use std::io;

use thiserror::Error;

/// Error categories for the tunnel system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Local configuration is unusable.
    Configuration,
    /// Connection and network errors.
    Connection,
    /// Protocol parsing/validation errors.
    Protocol,
    /// The endpoint refused the request.
    Authentication,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Connection => write!(f, "connection"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Authentication => write!(f, "authentication"),
        }
    }
}

/// A tunnel error.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The encrypted transport to the endpoint could not be established.
    #[error("failed to reach endpoint {endpoint}")]
    DialFailure {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// A length-prefixed field does not fit its one-byte length.
    #[error("{field} is {len} bytes, the limit is 255")]
    ValueTooLarge { field: &'static str, len: usize },

    /// The connect request was not fully written.
    #[error("connect request was not fully written")]
    WriteIncomplete(#[source] io::Error),

    /// The peer speaks a protocol version we do not understand.
    #[error("unsupported protocol version 0x{0:02x}")]
    VersionMismatch(u8),

    /// The endpoint answered with a nonzero status code.
    #[error("endpoint rejected the request with status 0x{code:02x}")]
    RemoteRejected { code: u8 },

    /// Response framing was truncated or otherwise malformed.
    #[error("malformed {field}")]
    ProtocolError {
        field: &'static str,
        #[source]
        source: io::Error,
    },
}

impl TunnelError {
    /// The coarse category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            TunnelError::ValueTooLarge { .. } => ErrorCategory::Configuration,
            TunnelError::DialFailure { .. } | TunnelError::WriteIncomplete(_) => {
                ErrorCategory::Connection
            }
            TunnelError::VersionMismatch(_) | TunnelError::ProtocolError { .. } => {
                ErrorCategory::Protocol
            }
            TunnelError::RemoteRejected { .. } => ErrorCategory::Authentication,
        }
    }

    /// Whether re-dialing might succeed. The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Connection
    }

    pub(crate) fn truncated(field: &'static str, source: io::Error) -> Self {
        TunnelError::ProtocolError { field, source }
    }
}

/// Result type using TunnelError.
pub type TunnelResult<T> = Result<T, TunnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TunnelError::ValueTooLarge {
            field: "username",
            len: 256,
        };
        assert_eq!(err.to_string(), "username is 256 bytes, the limit is 255");

        let err = TunnelError::VersionMismatch(0x05);
        assert_eq!(err.to_string(), "unsupported protocol version 0x05");

        let err = TunnelError::RemoteRejected { code: 0x01 };
        assert!(err.to_string().contains("0x01"));
    }

    #[test]
    fn test_error_source() {
        use std::error::Error as _;

        let err = TunnelError::truncated(
            "response message",
            io::Error::new(io::ErrorKind::UnexpectedEof, "early eof"),
        );
        assert_eq!(err.source().unwrap().to_string(), "early eof");
    }

    #[test]
    fn test_error_retryable() {
        let dial = TunnelError::DialFailure {
            endpoint: "tunnel.example.com:443".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(dial.is_retryable());
        assert!(TunnelError::WriteIncomplete(io::Error::from(io::ErrorKind::WriteZero)).is_retryable());
        assert!(!TunnelError::RemoteRejected { code: 2 }.is_retryable());
        assert!(!TunnelError::VersionMismatch(2).is_retryable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            TunnelError::RemoteRejected { code: 1 }.category().to_string(),
            "authentication"
        );
        assert_eq!(
            TunnelError::ValueTooLarge { field: "password", len: 300 }.category(),
            ErrorCategory::Configuration
        );
    }
}
