//! Client side of the connect handshake.
//!
//! The handshake is a strictly sequential exchange: the whole request is
//! written and flushed, then the response is read field by field. Each field
//! read is a state transition, and any failure is terminal: the transport is
//! shut down and dropped, and the caller has to dial again.

use mole_core::protocol::{self, STATUS_OK};
use mole_core::{ConnectRequest, EncryptedStream, TunnelError, TunnelResult};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

/// Where the handshake currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Transport connected, nothing sent yet.
    Dialed,
    RequestSent,
    ResponseVersionRead,
    ResponseStatusRead,
    /// The endpoint accepted the request; the stream is ready for relaying.
    Established,
    Failed,
}

/// Drives the handshake over an encrypted stream.
pub struct Handshake<S> {
    stream: S,
    state: HandshakeState,
    message: String,
}

impl<S: EncryptedStream> Handshake<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            state: HandshakeState::Dialed,
            message: String::new(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the handshake to completion.
    ///
    /// On success returns the stream together with the endpoint's
    /// informational message. On failure the stream has been shut down and
    /// dropped; a request that cannot be encoded only drops it.
    pub async fn run(mut self, request: &ConnectRequest) -> TunnelResult<(S, String)> {
        // Oversized fields fail before the transport is touched, close included.
        if let Err(e) = request.validate() {
            debug!("handshake aborted before sending: {}", e);
            return Err(e);
        }

        while self.state != HandshakeState::Established {
            if let Err(e) = self.step(request).await {
                debug!("handshake failed in state {:?}: {}", self.state, e);
                self.state = HandshakeState::Failed;
                let _ = self.stream.shutdown().await;
                return Err(e);
            }
            trace!("handshake state {:?}", self.state);
        }

        Ok((self.stream, self.message))
    }

    async fn step(&mut self, request: &ConnectRequest) -> TunnelResult<()> {
        self.state = match self.state {
            HandshakeState::Dialed => {
                let data = request.encode()?;
                self.stream
                    .write_all(&data)
                    .await
                    .map_err(TunnelError::WriteIncomplete)?;
                self.stream
                    .flush()
                    .await
                    .map_err(TunnelError::WriteIncomplete)?;
                HandshakeState::RequestSent
            }
            HandshakeState::RequestSent => {
                protocol::read_version(&mut self.stream).await?;
                HandshakeState::ResponseVersionRead
            }
            HandshakeState::ResponseVersionRead => {
                let code = protocol::read_u8(&mut self.stream, "response status").await?;
                if code != STATUS_OK {
                    return Err(TunnelError::RemoteRejected { code });
                }
                HandshakeState::ResponseStatusRead
            }
            HandshakeState::ResponseStatusRead => {
                self.message = protocol::read_message(&mut self.stream).await?;
                HandshakeState::Established
            }
            HandshakeState::Established | HandshakeState::Failed => self.state,
        };
        Ok(())
    }
}
