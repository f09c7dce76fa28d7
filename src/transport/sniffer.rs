//! Passive telemetry capture
//!
//! Boards broadcast some telemetry over UDP on the private segment. The
//! sniffer binds that port and feeds every datagram into the same raw channel
//! the pipes use, so the rest of the pipeline cannot tell the two sources
//! apart. Capture is observe-only: nothing is ever written back.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::Raw;
use crate::error::{GatewayError, Result};

/// Datagram buffer: same bound as the pipes' read buffer
const CAPTURE_BUFFER_SIZE: usize = 4096;

/// Poll granularity for noticing shutdown (milliseconds)
const SHUTDOWN_POLL_MS: u64 = 100;

/// Passive UDP capture feeding the shared raw channel
pub struct Sniffer;

impl Sniffer {
    /// Bind the capture port and spawn the receive task
    pub fn spawn(
        port: u16,
        raw_tx: mpsc::Sender<Raw>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<()> {
        let socket = bind_capture_socket(port)?;
        let local = socket
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| format!("0.0.0.0:{}", port));
        info!(port, "sniffer listening");

        tokio::spawn(async move {
            let mut buf = [0u8; CAPTURE_BUFFER_SIZE];

            while !shutdown.load(Ordering::Relaxed) {
                match tokio::time::timeout(
                    Duration::from_millis(SHUTDOWN_POLL_MS),
                    socket.recv_from(&mut buf),
                )
                .await
                {
                    Ok(Ok((len, addr))) => {
                        let raw = Raw::new(
                            addr.to_string(),
                            local.clone(),
                            Bytes::copy_from_slice(&buf[..len]),
                        );
                        if raw_tx.send(raw).await.is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => {
                        debug!(error = %e, "capture recv failed");
                    }
                    Err(_) => {
                        // Poll timeout, loop to re-check the shutdown flag
                    }
                }
            }
            debug!("sniffer stopped");
        });

        Ok(())
    }
}

/// Bind the capture port with SO_REUSEADDR so restarts rebind immediately
fn bind_capture_socket(port: u16) -> Result<Arc<UdpSocket>> {
    let map_err = |e| GatewayError::SnifferBind { port, source: e };

    let addr: SocketAddr = format!("0.0.0.0:{}", port)
        .parse()
        .expect("wildcard addr with u16 port is always valid");
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(map_err)?;
    socket.set_reuse_address(true).map_err(map_err)?;
    socket.set_nonblocking(true).map_err(map_err)?;
    socket.bind(&addr.into()).map_err(map_err)?;

    let std_socket: std::net::UdpSocket = socket.into();
    let tokio_socket = UdpSocket::from_std(std_socket).map_err(map_err)?;
    Ok(Arc::new(tokio_socket))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sniffer_forwards_datagrams() {
        // Bind on an ephemeral port via a probe socket to find a free one
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let (raw_tx, mut raw_rx) = mpsc::channel(16);
        let shutdown = Arc::new(AtomicBool::new(false));
        Sniffer::spawn(port, raw_tx, shutdown.clone()).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(&[0x00, 0x01, 0x42], ("127.0.0.1", port))
            .await
            .unwrap();

        let raw = tokio::time::timeout(Duration::from_secs(2), raw_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw.payload.as_ref(), &[0x00, 0x01, 0x42]);

        shutdown.store(true, Ordering::Relaxed);
    }

    #[tokio::test]
    async fn test_sniffer_stops_on_shutdown() {
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let (raw_tx, mut raw_rx) = mpsc::channel(16);
        let shutdown = Arc::new(AtomicBool::new(true));
        Sniffer::spawn(port, raw_tx, shutdown).unwrap();

        // Task exits promptly; the channel closes with it
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(raw_rx.recv().await.is_none());
    }
}
