//! Datagram transport adapter, active side: UDP and DTLS-over-UDP (§4.3).

use crate::endpoint::RemoteEndpoint;
use crate::message::MessageContext;
use crate::{Result, TapsError};
use async_trait::async_trait;
use std::net::SocketAddr;
#[cfg(feature = "dtls")]
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Abstracts over a connected UDP socket and a DTLS session so
/// [`DatagramAdapter`] can treat them identically.
#[async_trait]
trait DatagramIo: Send + Sync {
    async fn send(&self, data: &[u8]) -> Result<()>;
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;
    fn peer_addr(&self) -> Option<SocketAddr>;
}

struct ConnectedUdp {
    socket: UdpSocket,
    peer: SocketAddr,
}

#[async_trait]
impl DatagramIo for ConnectedUdp {
    async fn send(&self, data: &[u8]) -> Result<()> {
        self.socket.send(data).await.map(|_| ()).map_err(TapsError::Io)
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.socket.recv(buf).await.map_err(TapsError::Io)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}

#[cfg(feature = "dtls")]
struct DtlsIo {
    conn: Arc<dyn util::Conn + Send + Sync>,
    peer: Option<SocketAddr>,
}

#[cfg(feature = "dtls")]
#[async_trait]
impl DatagramIo for DtlsIo {
    async fn send(&self, data: &[u8]) -> Result<()> {
        self.conn
            .send(data)
            .await
            .map(|_| ())
            .map_err(|e| TapsError::Security(e.to_string()))
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.conn
            .recv(buf)
            .await
            .map_err(|e| TapsError::Security(e.to_string()))
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Per-connection datagram transport. No coalescing, no partial delivery:
/// every `read` returns exactly one complete datagram (§4.3).
pub(crate) struct DatagramAdapter {
    io: Box<dyn DatagramIo>,
    recv_lock: Mutex<()>,
}

impl DatagramAdapter {
    pub(crate) fn new_udp(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            io: Box::new(ConnectedUdp { socket, peer }),
            recv_lock: Mutex::new(()),
        }
    }

    #[cfg(feature = "dtls")]
    pub(crate) fn new_dtls(conn: Arc<dyn util::Conn + Send + Sync>, peer: Option<SocketAddr>) -> Self {
        Self {
            io: Box::new(DtlsIo { conn, peer }),
            recv_lock: Mutex::new(()),
        }
    }

    pub(crate) async fn write(&self, data: &[u8]) -> Result<()> {
        self.io.send(data).await
    }

    pub(crate) async fn read(&self) -> Result<(Vec<u8>, MessageContext, bool)> {
        let _guard = self.recv_lock.lock().await;
        let mut buf = vec![0u8; 65_535];
        let n = self.io.recv(&mut buf).await?;
        buf.truncate(n);
        let mut context = MessageContext::new();
        if let Some(peer) = self.io.peer_addr() {
            context = context.with_remote_endpoint(
                RemoteEndpoint::new().with_address(peer.ip()).with_port(peer.port()),
            );
        }
        Ok((buf, context, true))
    }

    pub(crate) async fn close(&self) -> Result<()> {
        Ok(())
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        self.io.peer_addr()
    }
}
