//! Accept-loop support shared by the client listener and the endpoint.

use std::future::Future;
use std::io;
use std::time::Duration;

use tracing::warn;

/// Pause after a failed accept, so fd exhaustion does not turn into a busy loop.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Call `accept` until it yields a connection.
///
/// Accept errors (`EMFILE`, `ECONNABORTED`, ...) only concern the connection
/// being accepted, so they are logged and retried after [`ACCEPT_BACKOFF`].
pub async fn accept_with_backoff<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn test_accept_retries_after_errors() {
        let mut results: VecDeque<io::Result<u32>> = VecDeque::from(vec![
            Err(io::Error::new(io::ErrorKind::Other, "Too many open files")),
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted")),
            Ok(7),
        ]);
        let mut calls = 0;

        let conn = accept_with_backoff(|| {
            calls += 1;
            let next = results.pop_front().unwrap();
            async move { next }
        })
        .await;

        assert_eq!(conn, 7);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_accept_from_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();

        let listener = &listener;
        let (_stream, peer) = accept_with_backoff(move || listener.accept()).await;
        assert!(peer.ip().is_loopback());
    }
}
