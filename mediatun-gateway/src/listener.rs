//! UDP ingress.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::router::{DatagramSink, IngestRouter};

const MAX_DATAGRAM: usize = 1500;

/// [`DatagramSink`] over the ingress socket; RTCP relay goes back out
/// the same port the media came in on.
struct UdpDatagramSink {
    socket: Arc<UdpSocket>,
}

#[async_trait]
impl DatagramSink for UdpDatagramSink {
    async fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket.send_to(payload, addr).await?;
        Ok(())
    }
}

pub struct UdpListener {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        Ok(Self { socket, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn sink(&self) -> Arc<dyn DatagramSink> {
        Arc::new(UdpDatagramSink {
            socket: Arc::clone(&self.socket),
        })
    }

    /// Read datagrams until shutdown, feeding the router sequentially so
    /// packets from this socket keep their arrival order. Read errors
    /// are transient; log and keep going.
    pub async fn run(self, router: Arc<IngestRouter>, shutdown: CancellationToken) {
        info!(addr = %self.local_addr, "listening");
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!(addr = %self.local_addr, "listener stopped");
                    return;
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, addr)) => router.write(addr, &buf[..len]).await,
                        Err(e) => warn!(addr = %self.local_addr, error = %e, "udp read failed"),
                    }
                }
            }
        }
    }
}
