//! Transports the handshake is allowed to run over.
//!
//! The connect request carries the username and password as plain bytes, so
//! it must only ever travel inside an encrypted stream. [`EncryptedStream`]
//! makes that a compile-time property: TLS streams implement it, raw sockets
//! do not.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A byte stream whose contents are encrypted on the wire.
pub trait EncryptedStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S> EncryptedStream for tokio_rustls::client::TlsStream<S> where
    S: AsyncRead + AsyncWrite + Unpin + Send
{
}

impl<S> EncryptedStream for tokio_rustls::server::TlsStream<S> where
    S: AsyncRead + AsyncWrite + Unpin + Send
{
}

/// Marks a stream as encrypted by some outer layer.
///
/// Use this for transports where TLS is terminated elsewhere, e.g. a unix
/// socket to a local TLS proxy or a WireGuard interface. Wrapping a plain TCP
/// socket sends credentials in cleartext.
#[derive(Debug)]
pub struct AssumeEncrypted<S>(S);

impl<S> AssumeEncrypted<S> {
    pub fn new(inner: S) -> Self {
        Self(inner)
    }

    pub fn get_ref(&self) -> &S {
        &self.0
    }

    pub fn into_inner(self) -> S {
        self.0
    }
}

impl<S> EncryptedStream for AssumeEncrypted<S> where S: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S: AsyncRead + Unpin> AsyncRead for AssumeEncrypted<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for AssumeEncrypted<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_assume_encrypted_passthrough() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut wrapped = AssumeEncrypted::new(a);

        wrapped.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        b.write_all(b"pong").await.unwrap();
        wrapped.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        wrapped.shutdown().await.unwrap();
        assert_eq!(b.read(&mut buf).await.unwrap(), 0);
    }
}
