//! Datagram demultiplexer: the listener-side half of the datagram adapter
//! family (§4.3, §4.6, §9).
//!
//! The listener owns one bound socket and a `peer addr -> inbox` table.
//! Packets from a known peer are routed to that peer's `DemuxAdapter`;
//! packets from a new peer register a fresh entry and are reported to the
//! listener as a new `ConnectionReceived`.

use crate::endpoint::RemoteEndpoint;
use crate::message::MessageContext;
use crate::{Result, TapsError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

/// Default idle TTL for demux table entries (§4.3).
pub const DEFAULT_DEMUX_TTL: Duration = Duration::from_secs(5 * 60);

/// Per-connection handle into the demux table: sends via the shared socket,
/// receives via a private inbox fed by the listener's recv loop.
pub(crate) struct DemuxAdapter {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbox: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl DemuxAdapter {
    pub(crate) fn new(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            socket,
            peer,
            inbox: Mutex::new(inbox),
        }
    }

    pub(crate) async fn write(&self, data: &[u8]) -> Result<()> {
        self.socket
            .send_to(data, self.peer)
            .await
            .map(|_| ())
            .map_err(TapsError::Io)
    }

    pub(crate) async fn read(&self) -> Result<(Vec<u8>, MessageContext, bool)> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some(data) => {
                let context = MessageContext::new().with_remote_endpoint(
                    RemoteEndpoint::new()
                        .with_address(self.peer.ip())
                        .with_port(self.peer.port()),
                );
                Ok((data, context, true))
            }
            None => Err(TapsError::Connection("peer channel closed".into())),
        }
    }

    pub(crate) async fn close(&self) -> Result<()> {
        Ok(())
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}

struct DemuxEntry {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    last_seen: Instant,
}

/// The listener's registry of active datagram "connections" by peer address.
pub(crate) struct DemuxTable {
    entries: Mutex<HashMap<SocketAddr, DemuxEntry>>,
    ttl: Duration,
}

impl DemuxTable {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Route `data` from `peer`. Returns a fresh inbox receiver when `peer`
    /// was not previously known — the caller must spawn a new Connection
    /// around it and emit `ConnectionReceived`.
    pub(crate) async fn route_or_register(
        &self,
        peer: SocketAddr,
        data: Vec<u8>,
    ) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&peer) {
            entry.last_seen = Instant::now();
            let _ = entry.sender.send(data);
            None
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(data);
            entries.insert(
                peer,
                DemuxEntry {
                    sender: tx,
                    last_seen: Instant::now(),
                },
            );
            Some(rx)
        }
    }

    pub(crate) async fn remove(&self, peer: &SocketAddr) {
        self.entries.lock().await.remove(peer);
    }

    /// Drop entries that have not received a packet within the configured
    /// TTL (§4.3, called periodically by the listener's sweep task).
    pub(crate) async fn sweep_idle(&self) {
        let ttl = self.ttl;
        self.entries
            .lock()
            .await
            .retain(|_, entry| entry.last_seen.elapsed() < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_peer_registers_and_known_peer_routes() {
        let table = DemuxTable::new(Duration::from_secs(60));
        let peer: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let mut rx = table
            .route_or_register(peer, b"first".to_vec())
            .await
            .expect("first packet from a peer registers a new entry");
        assert_eq!(rx.recv().await.unwrap(), b"first");

        assert!(table.route_or_register(peer, b"second".to_vec()).await.is_none());
        assert_eq!(rx.recv().await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn idle_sweep_removes_stale_entries() {
        let table = DemuxTable::new(Duration::from_millis(1));
        let peer: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        table.route_or_register(peer, b"hi".to_vec()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        table.sweep_idle().await;
        let rx = table.route_or_register(peer, b"again".to_vec()).await;
        assert!(rx.is_some(), "stale entry should have been swept");
    }
}
