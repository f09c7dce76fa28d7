//! Per-board TCP client
//!
//! A pipe owns exactly one TCP connection and its lifecycle:
//!
//! `Disconnected → dial loop → Connected → read loop → (error) → Disconnected`
//!
//! Dial attempts repeat indefinitely with a short pause; there is no backoff
//! schedule and no read timeout. Disconnection surfaces through failed reads
//! (OS keepalive/RST), at which point buffered bytes are dropped and the
//! dial loop re-enters. Each successful read allocates a fresh buffer and
//! emits one [`Raw`] on the shared output channel.
//!
//! Writes are allowed while a read is in flight; serialization onto the wire
//! is the socket's responsibility. A write against a disconnected pipe fails
//! with `PipeClosed` and the caller decides whether to retry — the gateway
//! does not buffer outbound orders.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, trace, warn};

use super::{ConnectionEvent, Raw};
use crate::constants::{REDIAL_DELAY_MS, TCP_KEEPALIVE_SECS};
use crate::error::{GatewayError, Result};

/// Poll granularity for noticing an explicit close (milliseconds)
const SHUTDOWN_POLL_MS: u64 = 100;

/// TCP client for one board
pub struct Pipe {
    board: String,
    laddr: SocketAddr,
    raddr: SocketAddr,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    closed: Arc<AtomicBool>,
}

impl Pipe {
    /// Spawn the dial/reconnect loop for one board
    ///
    /// The returned handle is for writing and explicit close; reads flow out
    /// through `raw_tx` and state transitions through `conn_tx`.
    pub fn spawn(
        board: impl Into<String>,
        laddr: SocketAddr,
        raddr: SocketAddr,
        mtu: usize,
        raw_tx: mpsc::Sender<Raw>,
        conn_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let board = board.into();
        info!(board = %board, %laddr, %raddr, "new pipe");

        let pipe = Self {
            board: board.clone(),
            laddr,
            raddr,
            writer: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        };

        let writer = pipe.writer.clone();
        let closed = pipe.closed.clone();
        tokio::spawn(async move {
            run(board, laddr, raddr, mtu, raw_tx, conn_tx, writer, closed).await;
        });

        pipe
    }

    /// Write the whole buffer to the board
    ///
    /// Returns the byte count on success. Fails with `PipeClosed` when no
    /// connection is live.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| GatewayError::PipeClosed {
            board: self.board.clone(),
        })?;

        trace!(board = %self.board, len = data.len(), "write");
        writer
            .write_all(data)
            .await
            .map_err(|e| GatewayError::PipeWrite {
                board: self.board.clone(),
                source: e,
            })?;
        Ok(data.len())
    }

    /// Stop the reconnect loop for good
    ///
    /// The reader notices within one poll interval; no further dial attempts
    /// are made.
    pub fn close(&self) {
        warn!(board = %self.board, "close");
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn board(&self) -> &str {
        &self.board
    }

    pub fn laddr(&self) -> SocketAddr {
        self.laddr
    }

    pub fn raddr(&self) -> SocketAddr {
        self.raddr
    }
}

/// Dial/read loop, one task per pipe
#[allow(clippy::too_many_arguments)]
async fn run(
    board: String,
    laddr: SocketAddr,
    raddr: SocketAddr,
    mtu: usize,
    raw_tx: mpsc::Sender<Raw>,
    conn_tx: mpsc::Sender<ConnectionEvent>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    closed: Arc<AtomicBool>,
) {
    while !closed.load(Ordering::Relaxed) {
        let stream = match dial(laddr, raddr).await {
            Ok(stream) => stream,
            Err(e) => {
                trace!(board = %board, error = %e, "dial failed");
                tokio::time::sleep(Duration::from_millis(REDIAL_DELAY_MS)).await;
                continue;
            }
        };

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| raddr.to_string());
        let local = stream
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| laddr.to_string());

        let (mut read_half, write_half) = stream.into_split();
        *writer.lock().await = Some(write_half);

        info!(board = %board, "connected");
        let _ = conn_tx
            .send(ConnectionEvent {
                board: board.clone(),
                is_up: true,
            })
            .await;

        // Read until error/EOF or explicit close. One fresh buffer per read;
        // ownership moves to the parser with the emitted Raw.
        let pipeline_alive = loop {
            if closed.load(Ordering::Relaxed) {
                break true;
            }

            let mut buffer = BytesMut::zeroed(mtu);
            match tokio::time::timeout(
                Duration::from_millis(SHUTDOWN_POLL_MS),
                read_half.read(&mut buffer),
            )
            .await
            {
                Ok(Ok(0)) => {
                    debug!(board = %board, "connection closed by peer");
                    break true;
                }
                Ok(Ok(n)) => {
                    buffer.truncate(n);
                    let raw = Raw::new(peer.clone(), local.clone(), buffer.freeze());
                    if raw_tx.send(raw).await.is_err() {
                        // Pipeline gone, nothing left to feed
                        break false;
                    }
                }
                Ok(Err(e)) => {
                    debug!(board = %board, error = %e, "read failed");
                    break true;
                }
                Err(_) => {
                    // Poll timeout, loop to re-check the close flag
                }
            }
        };

        *writer.lock().await = None;
        let _ = conn_tx
            .send(ConnectionEvent {
                board: board.clone(),
                is_up: false,
            })
            .await;

        if !pipeline_alive {
            break;
        }
    }
    debug!(board = %board, "pipe stopped");
}

/// Bind the configured local address and connect to the board
///
/// SO_REUSEADDR keeps redials from tripping over TIME_WAIT; TCP keepalive is
/// what eventually surfaces a dead peer to the read loop.
async fn dial(laddr: SocketAddr, raddr: SocketAddr) -> std::io::Result<TcpStream> {
    let socket = if raddr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(laddr)?;

    let stream = socket.connect(raddr).await?;
    SockRef::from(&stream).set_tcp_keepalive(
        &TcpKeepalive::new().with_time(Duration::from_secs(TCP_KEEPALIVE_SECS)),
    )?;
    Ok(stream)
}
