//! Bidirectional byte relay between two connections.
//!
//! One direction runs on a spawned task, the other inline on the caller's
//! task. When a direction ends, the write side it was feeding is shut down
//! and the opposite direction is interrupted, so a close on either peer tears
//! down both connections. [`relay`] returns once both directions stopped and
//! both streams have been dropped.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{debug, trace};

const BUFFER_SIZE: usize = 16 * 1024;

/// Upper bound on flushing a close to a peer that stopped reading.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How one copy direction ended.
#[derive(Debug)]
pub enum DirectionOutcome {
    /// The source reached EOF.
    Finished { bytes: u64 },
    /// The opposite direction closed first and this one was cut short.
    Interrupted { bytes: u64 },
    /// Reading or writing failed.
    Failed { bytes: u64, error: io::Error },
}

impl DirectionOutcome {
    /// Bytes moved before the direction stopped.
    pub fn bytes(&self) -> u64 {
        match self {
            DirectionOutcome::Finished { bytes }
            | DirectionOutcome::Interrupted { bytes }
            | DirectionOutcome::Failed { bytes, .. } => *bytes,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DirectionOutcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&io::Error> {
        match self {
            DirectionOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for DirectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectionOutcome::Finished { bytes } => write!(f, "finished after {} bytes", bytes),
            DirectionOutcome::Interrupted { bytes } => {
                write!(f, "interrupted after {} bytes", bytes)
            }
            DirectionOutcome::Failed { bytes, error } => {
                write!(f, "failed after {} bytes: {}", bytes, error)
            }
        }
    }
}

/// Result of a finished relay.
#[derive(Debug)]
pub struct RelayReport {
    /// Local connection to the remote side.
    pub outbound: DirectionOutcome,
    /// Remote side to the local connection.
    pub inbound: DirectionOutcome,
}

impl RelayReport {
    /// True when neither direction hit an I/O error.
    pub fn is_clean(&self) -> bool {
        !self.outbound.is_failed() && !self.inbound.is_failed()
    }
}

/// Pump bytes between `local` and `remote` until either side closes.
///
/// Both streams are owned by the relay and closed before it returns, on every
/// path. Must be called from within a tokio runtime.
pub async fn relay<L, R>(local: L, remote: R) -> RelayReport
where
    L: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut local_rd, mut local_wr) = tokio::io::split(local);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    // `stop` interrupts the spawned direction, `done` tells the inline one
    // that the spawned direction has ended.
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let (done_tx, done_rx) = oneshot::channel::<()>();

    let outbound_task = tokio::spawn(async move {
        let mut bytes = 0u64;
        let result = tokio::select! {
            result = pump(&mut local_rd, &mut remote_wr, &mut bytes) => Some(result),
            _ = stop_rx => None,
        };
        close_write(&mut remote_wr, "remote").await;
        let _ = done_tx.send(());
        trace!("outbound direction stopped after {} bytes", bytes);
        outcome(result, bytes)
    });

    let mut bytes = 0u64;
    let result = tokio::select! {
        result = pump(&mut remote_rd, &mut local_wr, &mut bytes) => Some(result),
        _ = done_rx => None,
    };
    close_write(&mut local_wr, "local").await;
    let _ = stop_tx.send(());
    trace!("inbound direction stopped after {} bytes", bytes);
    let inbound = outcome(result, bytes);

    drop(remote_rd);
    drop(local_wr);

    let outbound = match outbound_task.await {
        Ok(outcome) => outcome,
        Err(e) => DirectionOutcome::Failed {
            bytes: 0,
            error: io::Error::new(io::ErrorKind::Other, e),
        },
    };

    let report = RelayReport { outbound, inbound };
    debug!(
        "relay closed: outbound {}, inbound {}",
        report.outbound, report.inbound
    );
    report
}

/// Copy from `reader` to `writer` until EOF, counting into `bytes` so the
/// count survives cancellation.
async fn pump<Rd, Wr>(reader: &mut Rd, writer: &mut Wr, bytes: &mut u64) -> io::Result<()>
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *bytes += n as u64;
    }
}

/// Shut down a write half, giving up after [`SHUTDOWN_TIMEOUT`]. The half is
/// dropped by the caller either way.
async fn close_write<W>(writer: &mut W, side: &str)
where
    W: AsyncWrite + Unpin,
{
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!("{} shutdown failed: {}", side, e),
        Err(_) => debug!("{} shutdown timed out, dropping the connection", side),
    }
}

fn outcome(result: Option<io::Result<()>>, bytes: u64) -> DirectionOutcome {
    match result {
        Some(Ok(())) => DirectionOutcome::Finished { bytes },
        Some(Err(error)) => DirectionOutcome::Failed { bytes, error },
        None => DirectionOutcome::Interrupted { bytes },
    }
}
