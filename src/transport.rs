//! UDP datagram transport.
//!
//! Binds to a random port within the configured range (bounded retries,
//! terminal [`ChatError::PortBindFailure`] on exhaustion), then runs a
//! receive loop that forwards each inbound datagram, rendered as text, into
//! an mpsc channel for the router. Outbound frames go through
//! [`Transport::send_to`], which clones the underlying socket handle.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ChatError;

const MAX_DATAGRAM: usize = 65_536;

/// A bound datagram socket plus its receive loop.
#[derive(Debug)]
pub struct Transport {
    socket: Arc<UdpSocket>,
    local_port: u16,
}

impl Transport {
    /// Bind to a random free port within `[port_min, port_max)`.
    ///
    /// Tries at most `max_bind_attempts` random ports before giving up with
    /// a terminal error, so port exhaustion cannot livelock the process.
    pub async fn bind(config: &ClientConfig) -> Result<Self, ChatError> {
        for attempt in 1..=config.max_bind_attempts {
            let port = rand::random_range(config.port_min..config.port_max);
            match UdpSocket::bind(("0.0.0.0", port)).await {
                Ok(socket) => {
                    info!("Transport bound to port {port}");
                    return Ok(Self {
                        socket: Arc::new(socket),
                        local_port: port,
                    });
                }
                Err(e) => {
                    debug!("Cannot bind port {port} (attempt {attempt}): {e}");
                }
            }
        }
        Err(ChatError::PortBindFailure {
            attempts: config.max_bind_attempts,
        })
    }

    /// The port this transport is bound to, for directory check-in.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Spawn the receive loop. Each inbound datagram is decoded as UTF-8
    /// (the wire format is ASCII) and forwarded through `datagram_tx`;
    /// undecodable packets are dropped with a log line.
    pub fn start(
        &self,
        datagram_tx: mpsc::Sender<String>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, src)) => {
                                match std::str::from_utf8(&buf[..len]) {
                                    Ok(datagram) => {
                                        let _ = datagram_tx.send(datagram.to_string()).await;
                                    }
                                    Err(_) => {
                                        debug!("Dropping non-UTF-8 datagram from {src}");
                                    }
                                }
                            }
                            Err(e) => {
                                warn!("Datagram recv error: {e}");
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("Transport receive loop shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Send one frame to a peer endpoint.
    pub async fn send_to(&self, addr: SocketAddr, frame: &str) -> Result<(), ChatError> {
        self.socket.send_to(frame.as_bytes(), addr).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
