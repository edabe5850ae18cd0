//! Listener (C10): the passive-open counterpart of the racing engine. Binds
//! every viable (protocol, local-address) pair instead of racing them (§4.6).

use crate::adapter::demux::{DemuxAdapter, DemuxTable, DEFAULT_DEMUX_TTL};
use crate::adapter::multicast::McastAdapter;
use crate::adapter::stream::StreamAdapter;
use crate::adapter::Adapter;
use crate::connection::Connection;
use crate::endpoint::{filter_link_local, partition_v6_then_v4, LocalEndpoint};
use crate::framer::Framer;
use crate::multicast::MulticastJoin;
use crate::properties::{Direction, TransportProperties};
use crate::protocol::{registry, Protocol};
use crate::security::SecurityParameters;
use crate::selector::select;
use crate::{Result, TapsError};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener as TokioTcpListener, UdpSocket};
use tokio::sync::mpsc;

/// Events delivered on a Listener's event stream (§4.6).
#[derive(Debug)]
pub enum ListenerEvent {
    ConnectionReceived(Connection),
    ListenError(TapsError),
    Stopped,
}

/// A bound listener. Obtained from
/// [`crate::preconnection::Preconnection::listen`].
#[derive(Debug)]
pub struct Listener {
    events_rx: mpsc::UnboundedReceiver<ListenerEvent>,
    stopping: Arc<AtomicBool>,
}

impl Listener {
    pub(crate) async fn bind(
        local: LocalEndpoint,
        properties: TransportProperties,
        security: Option<SecurityParameters>,
        framer: Option<Arc<dyn Framer>>,
        multicast: Option<Arc<dyn MulticastJoin>>,
    ) -> Result<Self> {
        let ranked = select(&properties, &registry())?;
        let local_addrs = expand_local(&local).await?;
        let port = local.port().unwrap_or(0);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stopping = Arc::new(AtomicBool::new(false));
        let mut bound_any = false;
        let wants_multicast_join =
            properties.direction() == Direction::UnidirectionalReceive && multicast.is_some();

        for ranked_protocol in &ranked {
            for &addr in &local_addrs {
                if addr.is_multicast() {
                    if !wants_multicast_join {
                        continue;
                    }
                    let collaborator = multicast.clone().unwrap();
                    if spawn_multicast(collaborator, addr, port, events_tx.clone())
                        .await
                        .is_ok()
                    {
                        bound_any = true;
                    }
                    continue;
                }

                let socket_addr = SocketAddr::new(addr, port);
                let bound = match ranked_protocol.protocol {
                    Protocol::Tcp => {
                        spawn_tcp_accept(socket_addr, framer.clone(), events_tx.clone(), stopping.clone()).await
                    }
                    Protocol::TlsOverTcp => {
                        spawn_tls_accept(
                            socket_addr,
                            security.clone(),
                            framer.clone(),
                            events_tx.clone(),
                            stopping.clone(),
                        )
                        .await
                    }
                    Protocol::Udp => {
                        spawn_datagram_demux(socket_addr, DEFAULT_DEMUX_TTL, events_tx.clone(), stopping.clone())
                            .await
                    }
                    // Server-side DTLS demultiplexing (per-peer handshake
                    // fan-out over one socket) is not implemented; see
                    // DESIGN.md.
                    Protocol::DtlsOverUdp => Err(TapsError::NotSupported(
                        "listening on dtls-udp is not implemented".into(),
                    )),
                };
                if bound.is_ok() {
                    bound_any = true;
                }
            }
        }

        if !bound_any {
            return Err(TapsError::Listen(
                "no local bind succeeded for any (protocol, address) candidate".into(),
            ));
        }

        Ok(Self { events_rx, stopping })
    }

    /// The typed event stream (§4.6): poll this to accept connections.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<ListenerEvent> {
        &mut self.events_rx
    }

    /// Stop accepting new connections. In-flight spawned Connections are
    /// unaffected; their own event streams keep running.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }
}

async fn expand_local(local: &LocalEndpoint) -> Result<Vec<IpAddr>> {
    if let Some(host) = local.host_name() {
        let port = local.port().unwrap_or(0);
        let resolved: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|err| TapsError::Listen(format!("DNS resolution failed: {err}")))?
            .collect();
        let unique: HashSet<IpAddr> = resolved.into_iter().map(|addr| addr.ip()).collect();
        return Ok(partition_v6_then_v4(unique));
    }
    if local.addresses().is_empty() {
        return Ok(vec![
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        ]);
    }
    Ok(filter_link_local(partition_v6_then_v4(
        local.addresses().iter().copied(),
    )))
}

async fn spawn_tcp_accept(
    addr: SocketAddr,
    framer: Option<Arc<dyn Framer>>,
    events_tx: mpsc::UnboundedSender<ListenerEvent>,
    stopping: Arc<AtomicBool>,
) -> Result<()> {
    let listener = TokioTcpListener::bind(addr).await.map_err(TapsError::Io)?;
    tokio::spawn(async move {
        loop {
            if stopping.load(Ordering::SeqCst) {
                let _ = events_tx.send(ListenerEvent::Stopped);
                break;
            }
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let (read_half, write_half) = tokio::io::split(stream);
                    let adapter = Adapter::Stream(StreamAdapter::new(
                        Box::new(read_half),
                        Box::new(write_half),
                        Some(peer),
                        framer.clone(),
                    ));
                    if events_tx
                        .send(ListenerEvent::ConnectionReceived(Connection::established(adapter)))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => {
                    if events_tx.send(ListenerEvent::ListenError(TapsError::Io(err))).is_err() {
                        break;
                    }
                }
            }
        }
    });
    Ok(())
}

#[cfg(feature = "tls")]
async fn spawn_tls_accept(
    addr: SocketAddr,
    security: Option<SecurityParameters>,
    framer: Option<Arc<dyn Framer>>,
    events_tx: mpsc::UnboundedSender<ListenerEvent>,
    stopping: Arc<AtomicBool>,
) -> Result<()> {
    use tokio_rustls::TlsAcceptor;

    let config = tls::build_server_config(security.as_ref())?;
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let listener = TokioTcpListener::bind(addr).await.map_err(TapsError::Io)?;

    tokio::spawn(async move {
        loop {
            if stopping.load(Ordering::SeqCst) {
                let _ = events_tx.send(ListenerEvent::Stopped);
                break;
            }
            let (tcp_stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    if events_tx.send(ListenerEvent::ListenError(TapsError::Io(err))).is_err() {
                        break;
                    }
                    continue;
                }
            };
            let acceptor = acceptor.clone();
            let framer = framer.clone();
            let events_tx = events_tx.clone();
            tokio::spawn(async move {
                match acceptor.accept(tcp_stream).await {
                    Ok(tls_stream) => {
                        let (read_half, write_half) = tokio::io::split(tls_stream);
                        let adapter = Adapter::Stream(StreamAdapter::new(
                            Box::new(read_half),
                            Box::new(write_half),
                            Some(peer),
                            framer,
                        ));
                        let _ =
                            events_tx.send(ListenerEvent::ConnectionReceived(Connection::established(adapter)));
                    }
                    Err(err) => {
                        let _ = events_tx.send(ListenerEvent::ListenError(TapsError::Security(err.to_string())));
                    }
                }
            });
        }
    });
    Ok(())
}

#[cfg(not(feature = "tls"))]
async fn spawn_tls_accept(
    _addr: SocketAddr,
    _security: Option<SecurityParameters>,
    _framer: Option<Arc<dyn Framer>>,
    _events_tx: mpsc::UnboundedSender<ListenerEvent>,
    _stopping: Arc<AtomicBool>,
) -> Result<()> {
    Err(TapsError::NotSupported("crate built without the \"tls\" feature".into()))
}

#[cfg(feature = "tls")]
mod tls {
    use crate::security::SecurityParameters;
    use crate::{Result, TapsError};
    use std::io::BufReader;
    use tokio_rustls::rustls::pki_types::CertificateDer;
    use tokio_rustls::rustls::ServerConfig;

    pub(super) fn build_server_config(security: Option<&SecurityParameters>) -> Result<ServerConfig> {
        let identity = security
            .and_then(|params| params.identity())
            .ok_or_else(|| TapsError::Security("tls-tcp listener requires a local identity".into()))?;

        let mut cert_reader = BufReader::new(identity.certificate_chain.as_slice());
        let certs: std::result::Result<Vec<CertificateDer<'static>>, _> =
            rustls_pemfile::certs(&mut cert_reader).collect();
        let certs = certs.map_err(|err| TapsError::Security(err.to_string()))?;
        let mut key_reader = BufReader::new(identity.private_key.as_slice());
        let key = rustls_pemfile::private_key(&mut key_reader)
            .map_err(|err| TapsError::Security(err.to_string()))?
            .ok_or_else(|| TapsError::Security("no private key found".into()))?;

        ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|err| TapsError::Security(err.to_string()))
    }
}

async fn spawn_datagram_demux(
    addr: SocketAddr,
    ttl: Duration,
    events_tx: mpsc::UnboundedSender<ListenerEvent>,
    stopping: Arc<AtomicBool>,
) -> Result<()> {
    let socket = Arc::new(UdpSocket::bind(addr).await.map_err(TapsError::Io)?);
    let table = Arc::new(DemuxTable::new(ttl));

    {
        let table = table.clone();
        let stopping = stopping.clone();
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(ttl);
            loop {
                sweep.tick().await;
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                table.sweep_idle().await;
            }
        });
    }

    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        loop {
            if stopping.load(Ordering::SeqCst) {
                let _ = events_tx.send(ListenerEvent::Stopped);
                break;
            }
            match socket.recv_from(&mut buf).await {
                Ok((n, peer)) => {
                    let data = buf[..n].to_vec();
                    if let Some(inbox) = table.route_or_register(peer, data).await {
                        let adapter = Adapter::Demux(DemuxAdapter::new(socket.clone(), peer, inbox));
                        if events_tx
                            .send(ListenerEvent::ConnectionReceived(Connection::established(adapter)))
                            .is_err()
                        {
                            break;
                        }
                    }
                }
                Err(err) => {
                    if events_tx.send(ListenerEvent::ListenError(TapsError::Io(err))).is_err() {
                        break;
                    }
                }
            }
        }
    });
    Ok(())
}

async fn spawn_multicast(
    collaborator: Arc<dyn MulticastJoin>,
    group: IpAddr,
    port: u16,
    events_tx: mpsc::UnboundedSender<ListenerEvent>,
) -> Result<()> {
    let handle = tokio::runtime::Handle::current();
    collaborator.initialize(&handle).await?;
    let (sink_tx, sink_rx) = mpsc::unbounded_channel();
    let ctx = collaborator.join(group, None, port, sink_tx).await?;
    let adapter = Adapter::Multicast(McastAdapter::new(sink_rx));
    let connection = Connection::established(adapter).with_multicast(collaborator, ctx);
    let _ = events_tx.send(ListenerEvent::ConnectionReceived(connection));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unbound_local_endpoint_expands_to_both_families() {
        let ep = LocalEndpoint::new();
        let expanded = expand_local(&ep).await.unwrap();
        assert_eq!(
            expanded,
            vec![IpAddr::V6(Ipv6Addr::UNSPECIFIED), IpAddr::V4(Ipv4Addr::UNSPECIFIED)]
        );
    }

    #[tokio::test]
    async fn bind_to_ephemeral_tcp_port_yields_a_listener() {
        let local = LocalEndpoint::new().with_address(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let mut props = TransportProperties::new();
        props.require("reliability");
        props.prohibit("preserve-msg-boundaries");

        let listener = Listener::bind(local, props, None, None, None).await.unwrap();
        drop(listener);
    }
}
