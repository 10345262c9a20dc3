//! Wire protocol for tunnel negotiation.
//!
//! Two messages are exchanged before any payload flows: the client sends a
//! [`ConnectRequest`] naming its credentials and the target, the endpoint
//! answers with a [`ConnectResponse`]. Integers are big-endian and every
//! variable-length field carries a one-byte length prefix, so no field may
//! exceed 255 bytes.
//!
//! Readers never assume a single `read` returns a whole field: every field is
//! pulled with `read_exact`, which keeps reading until the declared number of
//! bytes arrived or the stream ends.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{TunnelError, TunnelResult};

/// Protocol version marker carried first in both messages.
pub const VER01: u8 = 0x01;

/// Status code for an accepted request. Every other value is a rejection
/// whose meaning is up to the endpoint.
pub const STATUS_OK: u8 = 0x00;

/// Largest value a one-byte length prefix can describe.
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// Address type tag sent alongside the target host.
///
/// The tag is opaque to the tunnel; only the endpoint interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetType(pub u8);

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// Request asking the endpoint to open a connection to a target.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub username: String,
    pub password: String,
    pub target_port: u16,
    pub target_type: TargetType,
    pub target_host: String,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("target_port", &self.target_port)
            .field("target_type", &self.target_type)
            .field("target_host", &self.target_host)
            .finish()
    }
}

impl ConnectRequest {
    /// Check that every length-prefixed field fits its prefix.
    pub fn validate(&self) -> TunnelResult<()> {
        check_len("username", self.username.len())?;
        check_len("password", self.password.len())?;
        check_len("target host", self.target_host.len())
    }

    /// Number of bytes [`encode`](Self::encode) produces.
    pub fn encoded_len(&self) -> usize {
        1 + 1 + self.username.len() + 1 + self.password.len() + 2 + 1 + 1 + self.target_host.len()
    }

    /// Serialize the request.
    ///
    /// Fails with [`TunnelError::ValueTooLarge`] before producing any bytes
    /// if a field is too long.
    pub fn encode(&self) -> TunnelResult<Bytes> {
        self.validate()?;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(VER01);
        put_prefixed(&mut buf, self.username.as_bytes());
        put_prefixed(&mut buf, self.password.as_bytes());
        buf.put_u16(self.target_port);
        buf.put_u8(self.target_type.0);
        put_prefixed(&mut buf, self.target_host.as_bytes());

        Ok(buf.freeze())
    }

    /// Read a request from the stream, as the endpoint does.
    pub async fn read_from<R>(reader: &mut R) -> TunnelResult<Self>
    where
        R: AsyncRead + Unpin,
    {
        read_version(reader).await?;
        let username = read_prefixed_str(reader, "username").await?;
        let password = read_prefixed_str(reader, "password").await?;
        let target_port = reader
            .read_u16()
            .await
            .map_err(|e| TunnelError::truncated("target port", e))?;
        let target_type = TargetType(read_u8(reader, "target type").await?);
        let target_host = read_prefixed_str(reader, "target host").await?;

        Ok(Self {
            username,
            password,
            target_port,
            target_type,
            target_host,
        })
    }
}

/// The endpoint's answer to a [`ConnectRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub status: u8,
    /// Informational text, never interpreted.
    pub message: String,
}

impl ConnectResponse {
    /// An accepting response with an empty message.
    pub fn ok() -> Self {
        Self {
            status: STATUS_OK,
            message: String::new(),
        }
    }

    /// A rejecting response.
    pub fn rejected(status: u8, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Serialize the response.
    pub fn encode(&self) -> TunnelResult<Bytes> {
        check_len("response message", self.message.len())?;

        let mut buf = BytesMut::with_capacity(3 + self.message.len());
        buf.put_u8(VER01);
        buf.put_u8(self.status);
        put_prefixed(&mut buf, self.message.as_bytes());
        Ok(buf.freeze())
    }

    /// Read a complete response regardless of its status.
    ///
    /// A bad version byte is reported before anything else is read.
    pub async fn read_from<R>(reader: &mut R) -> TunnelResult<Self>
    where
        R: AsyncRead + Unpin,
    {
        read_version(reader).await?;
        let status = read_u8(reader, "response status").await?;
        let message = read_message(reader).await?;
        Ok(Self { status, message })
    }
}

/// Read the version byte and check it against [`VER01`].
pub async fn read_version<R>(reader: &mut R) -> TunnelResult<()>
where
    R: AsyncRead + Unpin,
{
    match read_u8(reader, "version").await? {
        VER01 => Ok(()),
        other => Err(TunnelError::VersionMismatch(other)),
    }
}

/// Read exactly one byte.
pub async fn read_u8<R>(reader: &mut R, field: &'static str) -> TunnelResult<u8>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    reader
        .read_exact(&mut byte)
        .await
        .map_err(|e| TunnelError::truncated(field, e))?;
    Ok(byte[0])
}

/// Read a length byte followed by exactly that many bytes.
pub async fn read_prefixed<R>(reader: &mut R, field: &'static str) -> TunnelResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = read_u8(reader, field).await? as usize;
    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .await
        .map_err(|e| TunnelError::truncated(field, e))?;
    Ok(data)
}

/// Read the length-prefixed response message.
///
/// Invalid UTF-8 is replaced rather than rejected since the text is only
/// ever logged.
pub async fn read_message<R>(reader: &mut R) -> TunnelResult<String>
where
    R: AsyncRead + Unpin,
{
    let data = read_prefixed(reader, "response message").await?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

async fn read_prefixed_str<R>(reader: &mut R, field: &'static str) -> TunnelResult<String>
where
    R: AsyncRead + Unpin,
{
    let data = read_prefixed(reader, field).await?;
    String::from_utf8(data).map_err(|e| {
        TunnelError::truncated(
            field,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })
}

fn check_len(field: &'static str, len: usize) -> TunnelResult<()> {
    if len > MAX_FIELD_LEN {
        return Err(TunnelError::ValueTooLarge { field, len });
    }
    Ok(())
}

// Callers must have checked the length with `check_len`.
fn put_prefixed(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u8(data.len() as u8);
    buf.put_slice(data);
}
