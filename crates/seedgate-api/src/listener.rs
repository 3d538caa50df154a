//! TCP listener with an IP block list applied at accept time.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Listener refusing connections from blocked addresses before any HTTP
/// processing happens.
pub struct BlockedListener {
    inner: TcpListener,
    blocked: Vec<IpAddr>,
}

impl BlockedListener {
    /// Wrap `inner`, refusing connections from `blocked` peers.
    #[must_use]
    pub fn new(inner: TcpListener, blocked: Vec<IpAddr>) -> Self {
        Self { inner, blocked }
    }
}

impl axum::serve::Listener for BlockedListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.inner.accept().await {
                Ok((stream, peer)) => {
                    if self.blocked.contains(&peer.ip()) {
                        debug!(peer = %peer, "refusing blocked peer");
                        drop(stream);
                        continue;
                    }
                    return (stream, peer);
                }
                Err(err) => {
                    debug!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}
