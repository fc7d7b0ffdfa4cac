//! Bidirectional byte relay between the two legs of a tunnel.
//!
//! # Data Flow
//! ```text
//! client leg ──read──▶ pipe(client→upstream) ──write──▶ upstream leg
//! client leg ◀─write── pipe(upstream→client) ◀──read─── upstream leg
//! ```
//!
//! Each pipe copies until its source ends, then closes its destination:
//! close frame, transport shutdown according to the leg's [`CloseMode`], and
//! finally a full close, which also stops the other pipe's read on that leg.
//! Frames are never parsed.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::net::{CloseMode, TunnelId};
use crate::observability::metrics;

/// Close frame: FIN + opcode 0x8, 2-byte payload, status 1000 (normal closure).
pub const CLOSE_FRAME: [u8; 4] = [0x88, 0x02, 0x03, 0xE8];

const COPY_BUFFER_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "client_to_upstream",
            Direction::UpstreamToClient => "upstream_to_client",
        }
    }
}

/// Bytes moved in each direction over a tunnel's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// One end of a tunnel and how it must be closed.
pub struct Leg<T> {
    pub io: T,
    pub close_mode: CloseMode,
}

impl<T> Leg<T> {
    pub fn new(io: T, close_mode: CloseMode) -> Self {
        Self { io, close_mode }
    }
}

/// Relay bytes between `client` and `upstream` until both directions have finished.
///
/// Both legs are owned here and are fully closed when this returns.
pub async fn run<C, U>(
    tunnel_id: TunnelId,
    client: Leg<C>,
    upstream: Leg<U>,
    close_deadline: Duration,
) -> RelayReport
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_rd, client_wr) = tokio::io::split(client.io);
    let (upstream_rd, upstream_wr) = tokio::io::split(upstream.io);

    // Fired when a leg is fully closed; its reader stops at that point.
    let (client_closed_tx, client_closed_rx) = watch::channel(false);
    let (upstream_closed_tx, upstream_closed_rx) = watch::channel(false);

    let to_upstream = tokio::spawn(pipe(
        tunnel_id,
        Direction::ClientToUpstream,
        client_rd,
        client_closed_rx,
        Destination {
            io: upstream_wr,
            close_mode: upstream.close_mode,
            closed: upstream_closed_tx,
        },
        close_deadline,
    ));
    let to_client = tokio::spawn(pipe(
        tunnel_id,
        Direction::UpstreamToClient,
        upstream_rd,
        upstream_closed_rx,
        Destination {
            io: client_wr,
            close_mode: client.close_mode,
            closed: client_closed_tx,
        },
        close_deadline,
    ));

    let (to_upstream, to_client) = tokio::join!(to_upstream, to_client);
    let mut report = RelayReport::default();
    match to_upstream {
        Ok(bytes) => report.client_to_upstream = bytes,
        Err(e) => tracing::error!(tunnel_id = %tunnel_id, error = %e, "Relay task failed"),
    }
    match to_client {
        Ok(bytes) => report.upstream_to_client = bytes,
        Err(e) => tracing::error!(tunnel_id = %tunnel_id, error = %e, "Relay task failed"),
    }
    report
}

struct Destination<W> {
    io: W,
    close_mode: CloseMode,
    closed: watch::Sender<bool>,
}

async fn pipe<R, W>(
    tunnel_id: TunnelId,
    direction: Direction,
    mut src: R,
    mut src_closed: watch::Receiver<bool>,
    mut dst: Destination<W>,
    close_deadline: Duration,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut copied = 0u64;
    let outcome = tokio::select! {
        res = copy_counted(&mut src, &mut dst.io, &mut copied) => res,
        _ = leg_closed(&mut src_closed) => Ok(()),
    };

    match outcome {
        Ok(()) => tracing::debug!(
            tunnel_id = %tunnel_id,
            direction = direction.as_str(),
            bytes = copied,
            "Pipe finished"
        ),
        Err(e) => tracing::warn!(
            tunnel_id = %tunnel_id,
            direction = direction.as_str(),
            bytes = copied,
            error = %e,
            "Pipe error"
        ),
    }
    metrics::record_tunnel_bytes(direction.as_str(), copied);

    // Nothing more is read from the source; let its writer finish closing it.
    drop(src_closed);
    drop(src);

    close_destination(&mut dst, close_deadline).await;
    copied
}

/// Resolves once the leg has been fully closed by the other pipe.
async fn leg_closed(closed: &mut watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

async fn copy_counted<R, W>(src: &mut R, dst: &mut W, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        dst.write_all(&buf[..n]).await?;
        dst.flush().await?;
        *copied += n as u64;
    }
}

/// Post-copy hook: close frame, transport shutdown, full close.
async fn close_destination<W>(dst: &mut Destination<W>, deadline: Duration)
where
    W: AsyncWrite + Unpin,
{
    let frame = async {
        dst.io.write_all(&CLOSE_FRAME).await?;
        dst.io.flush().await
    };
    if let Ok(Err(e)) = tokio::time::timeout(deadline, frame).await {
        tracing::trace!(error = %e, "Close frame not delivered");
    }

    match dst.close_mode {
        CloseMode::Secure => {
            // close_notify, then give the peer's own close_notify time to
            // reach the reader of this leg before tearing it down.
            let _ = tokio::time::timeout(deadline, dst.io.shutdown()).await;
            let _ = tokio::time::timeout(deadline, dst.closed.closed()).await;
        }
        CloseMode::HalfClose => {
            let _ = tokio::time::timeout(deadline, dst.io.shutdown()).await;
        }
    }

    let _ = dst.closed.send(true);
}
