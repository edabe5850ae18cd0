//! Racing engine (C9): resolves candidates and races them to the first
//! Established transport (§4.2).

use crate::adapter::datagram::DatagramAdapter;
use crate::adapter::stream::StreamAdapter;
use crate::adapter::Adapter;
use crate::connection::{Connection, ConnectionInner};
use crate::endpoint::{filter_link_local, partition_v6_then_v4, LocalEndpoint, RemoteEndpoint};
use crate::framer::Framer;
use crate::protocol::{registry, Protocol};
use crate::properties::TransportProperties;
use crate::security::SecurityParameters;
use crate::selector::select;
use crate::{Result, TapsError};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpSocket, UdpSocket};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;

/// Delay between successive stream candidate launches (§4.2).
pub const STAGGER_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone)]
struct Candidate {
    protocol: Protocol,
    remote_addr: IpAddr,
    remote_port: u16,
    local_addr: Option<IpAddr>,
    host_name: Option<String>,
}

/// Drive a full race to completion, installing the winning adapter (or
/// failing the connection) on `conn_inner` (§4.2).
pub(crate) async fn race(
    local: Option<LocalEndpoint>,
    remote: RemoteEndpoint,
    properties: TransportProperties,
    security: Option<SecurityParameters>,
    framer: Option<Arc<dyn Framer>>,
    conn_inner: Arc<ConnectionInner>,
) {
    let ranked = match select(&properties, &registry()) {
        Ok(ranked) => ranked,
        Err(err) => {
            Connection::fail_initiate(&conn_inner, err).await;
            return;
        }
    };

    let remote_port = match remote.port() {
        Some(port) => port,
        None => {
            Connection::fail_initiate(
                &conn_inner,
                TapsError::InvalidParameters("remote endpoint has no port".into()),
            )
            .await;
            return;
        }
    };

    let remote_addrs = match resolve_remote(&remote, remote_port).await {
        Ok(addrs) if !addrs.is_empty() => addrs,
        Ok(_) => {
            Connection::fail_initiate(
                &conn_inner,
                TapsError::Initiate("no remote address resolved".into()),
            )
            .await;
            return;
        }
        Err(err) => {
            Connection::fail_initiate(&conn_inner, err).await;
            return;
        }
    };

    let local_addrs = expand_local(&local);
    let interface = local.as_ref().and_then(|l| l.interface().map(str::to_string));
    let host_name = remote.host_name().map(str::to_string);

    let mut candidates = Vec::new();
    for ranked_protocol in &ranked {
        for &remote_addr in &remote_addrs {
            for &local_addr in &local_addrs {
                candidates.push(Candidate {
                    protocol: ranked_protocol.protocol,
                    remote_addr,
                    remote_port,
                    local_addr,
                    host_name: host_name.clone(),
                });
            }
        }
    }

    if candidates.is_empty() {
        Connection::fail_initiate(&conn_inner, TapsError::Selection).await;
        return;
    }

    let (winner_tx, mut winner_rx) = oneshot::channel::<Adapter>();
    let winner_tx = Arc::new(Mutex::new(Some(winner_tx)));
    let mut attempts = JoinSet::new();
    let mut committed = false;

    for candidate in candidates {
        let is_datagram = candidate.protocol.is_datagram();
        let winner_tx = winner_tx.clone();
        let security = security.clone();
        let framer = framer.clone();
        let interface = interface.clone();
        attempts.spawn(async move {
            if let Ok(adapter) = connect_candidate(candidate, security, framer, interface).await {
                let mut slot = winner_tx.lock().await;
                if let Some(sender) = slot.take() {
                    let _ = sender.send(adapter);
                }
                // Otherwise another candidate already won; `adapter` drops
                // here, closing whatever socket this attempt opened.
            }
        });

        if is_datagram {
            // Datagram candidates are not raced across remote addresses: the
            // first one "succeeds" immediately, so racing stops here (§4.2).
            break;
        }

        // Race the stagger delay against the winner arriving early so a
        // quick commit doesn't wait out the remaining launches (§4.2 step 5).
        tokio::select! {
            _ = tokio::time::sleep(STAGGER_DELAY) => {}
            result = &mut winner_rx => {
                finish(&conn_inner, &mut attempts, result).await;
                committed = true;
                break;
            }
        }
    }

    if !committed {
        let result = winner_rx.await;
        finish(&conn_inner, &mut attempts, result).await;
    }
}

/// Install the winning adapter or fail the connection, aborting every other
/// in-flight attempt either way.
async fn finish(
    conn_inner: &Arc<ConnectionInner>,
    attempts: &mut JoinSet<()>,
    result: std::result::Result<Adapter, oneshot::error::RecvError>,
) {
    attempts.abort_all();
    match result {
        Ok(adapter) => Connection::install_adapter(conn_inner, adapter).await,
        Err(_) => {
            Connection::fail_initiate(
                conn_inner,
                TapsError::Initiate("no candidate reached Established".into()),
            )
            .await
        }
    }
}

async fn resolve_remote(remote: &RemoteEndpoint, port: u16) -> Result<Vec<IpAddr>> {
    if let Some(host) = remote.host_name() {
        let resolved: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|err| TapsError::Initiate(format!("DNS resolution failed: {err}")))?
            .collect();
        let unique: HashSet<IpAddr> = resolved.into_iter().map(|addr| addr.ip()).collect();
        Ok(partition_v6_then_v4(unique))
    } else {
        let unique: HashSet<IpAddr> = remote.addresses().iter().copied().collect();
        Ok(partition_v6_then_v4(unique))
    }
}

fn expand_local(local: &Option<LocalEndpoint>) -> Vec<Option<IpAddr>> {
    match local {
        Some(endpoint) if !endpoint.addresses().is_empty() => {
            filter_link_local(partition_v6_then_v4(endpoint.addresses().iter().copied()))
                .into_iter()
                .map(Some)
                .collect()
        }
        _ => vec![None],
    }
}

fn build_tcp_socket(local: Option<IpAddr>, is_v6: bool, interface: Option<&str>) -> Result<TcpSocket> {
    let socket = if is_v6 { TcpSocket::new_v6() } else { TcpSocket::new_v4() }.map_err(TapsError::Io)?;

    #[cfg(target_os = "linux")]
    if let Some(name) = interface {
        let sock_ref = socket2::SockRef::from(&socket);
        let _ = sock_ref.bind_device(Some(name.as_bytes()));
    }
    #[cfg(not(target_os = "linux"))]
    let _ = interface;

    if let Some(addr) = local {
        socket.bind(SocketAddr::new(addr, 0)).map_err(TapsError::Io)?;
    }
    Ok(socket)
}

async fn connect_candidate(
    candidate: Candidate,
    security: Option<SecurityParameters>,
    framer: Option<Arc<dyn Framer>>,
    interface: Option<String>,
) -> Result<Adapter> {
    match candidate.protocol {
        Protocol::Tcp => connect_tcp(candidate, framer, interface).await,
        Protocol::TlsOverTcp => connect_tls(candidate, security, framer, interface).await,
        Protocol::Udp => connect_udp(candidate).await,
        Protocol::DtlsOverUdp => connect_dtls(candidate, security).await,
    }
}

async fn connect_tcp(
    candidate: Candidate,
    framer: Option<Arc<dyn Framer>>,
    interface: Option<String>,
) -> Result<Adapter> {
    let remote = SocketAddr::new(candidate.remote_addr, candidate.remote_port);
    let socket = build_tcp_socket(candidate.local_addr, remote.is_ipv6(), interface.as_deref())?;
    let stream = socket.connect(remote).await.map_err(TapsError::Io)?;
    let peer = stream.peer_addr().ok();
    let (read_half, write_half) = tokio::io::split(stream);
    Ok(Adapter::Stream(StreamAdapter::new(
        Box::new(read_half),
        Box::new(write_half),
        peer,
        framer,
    )))
}

async fn connect_udp(candidate: Candidate) -> Result<Adapter> {
    let remote = SocketAddr::new(candidate.remote_addr, candidate.remote_port);
    let bind_addr = match candidate.local_addr {
        Some(addr) => SocketAddr::new(addr, 0),
        None if remote.is_ipv6() => "[::]:0".parse().unwrap(),
        None => "0.0.0.0:0".parse().unwrap(),
    };
    let socket = UdpSocket::bind(bind_addr).await.map_err(TapsError::Io)?;
    socket.connect(remote).await.map_err(TapsError::Io)?;
    Ok(Adapter::Datagram(DatagramAdapter::new_udp(socket, remote)))
}

#[cfg(feature = "tls")]
async fn connect_tls(
    candidate: Candidate,
    security: Option<SecurityParameters>,
    framer: Option<Arc<dyn Framer>>,
    interface: Option<String>,
) -> Result<Adapter> {
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::TlsConnector;

    let remote = SocketAddr::new(candidate.remote_addr, candidate.remote_port);
    let socket = build_tcp_socket(candidate.local_addr, remote.is_ipv6(), interface.as_deref())?;
    let tcp_stream = socket.connect(remote).await.map_err(TapsError::Io)?;
    let peer = tcp_stream.peer_addr().ok();

    let config = tls::build_client_config(security.as_ref())?;
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = candidate
        .host_name
        .clone()
        .unwrap_or_else(|| candidate.remote_addr.to_string());
    let server_name = ServerName::try_from(server_name)
        .map_err(|err| TapsError::Security(err.to_string()))?
        .to_owned();
    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|err| TapsError::Security(err.to_string()))?;
    let (read_half, write_half) = tokio::io::split(tls_stream);
    Ok(Adapter::Stream(StreamAdapter::new(
        Box::new(read_half),
        Box::new(write_half),
        peer,
        framer,
    )))
}

#[cfg(not(feature = "tls"))]
async fn connect_tls(
    _candidate: Candidate,
    _security: Option<SecurityParameters>,
    _framer: Option<Arc<dyn Framer>>,
    _interface: Option<String>,
) -> Result<Adapter> {
    Err(TapsError::NotSupported("crate built without the \"tls\" feature".into()))
}

#[cfg(feature = "tls")]
mod tls {
    use crate::security::SecurityParameters;
    use crate::{Result, TapsError};
    use std::io::BufReader;
    use tokio_rustls::rustls::pki_types::CertificateDer;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};

    pub(super) fn build_client_config(security: Option<&SecurityParameters>) -> Result<ClientConfig> {
        let mut roots = RootCertStore::empty();
        if let Some(params) = security {
            for ca in params.trusted_ca() {
                let mut reader = BufReader::new(ca.as_slice());
                for cert in rustls_pemfile::certs(&mut reader) {
                    let cert = cert.map_err(|err| TapsError::Security(err.to_string()))?;
                    roots
                        .add(cert)
                        .map_err(|err| TapsError::Security(err.to_string()))?;
                }
            }
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);
        let config = match security.and_then(|params| params.identity()) {
            Some(identity) => {
                let mut cert_reader = BufReader::new(identity.certificate_chain.as_slice());
                let certs: std::result::Result<Vec<CertificateDer<'static>>, _> =
                    rustls_pemfile::certs(&mut cert_reader).collect();
                let certs = certs.map_err(|err| TapsError::Security(err.to_string()))?;
                let mut key_reader = BufReader::new(identity.private_key.as_slice());
                let key = rustls_pemfile::private_key(&mut key_reader)
                    .map_err(|err| TapsError::Security(err.to_string()))?
                    .ok_or_else(|| TapsError::Security("no private key found".into()))?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|err| TapsError::Security(err.to_string()))?
            }
            None => builder.with_no_client_auth(),
        };
        Ok(config)
    }
}

#[cfg(feature = "dtls")]
async fn connect_dtls(candidate: Candidate, security: Option<SecurityParameters>) -> Result<Adapter> {
    use crate::adapter::datagram::DatagramAdapter as Dgram;

    let remote = SocketAddr::new(candidate.remote_addr, candidate.remote_port);
    let bind_addr = match candidate.local_addr {
        Some(addr) => SocketAddr::new(addr, 0),
        None if remote.is_ipv6() => "[::]:0".parse().unwrap(),
        None => "0.0.0.0:0".parse().unwrap(),
    };
    let std_socket = std::net::UdpSocket::bind(bind_addr).map_err(TapsError::Io)?;
    std_socket.connect(remote).map_err(TapsError::Io)?;
    std_socket.set_nonblocking(true).map_err(TapsError::Io)?;
    let udp = UdpSocket::from_std(std_socket).map_err(TapsError::Io)?;
    let net_conn: Arc<dyn util::Conn + Send + Sync> = Arc::new(udp);

    let mut config = dtls::config::Config::default();
    config.server_name = candidate
        .host_name
        .clone()
        .unwrap_or_else(|| candidate.remote_addr.to_string());
    if let Some(identity) = security.as_ref().and_then(|params| params.identity()) {
        // The exact webrtc-dtls certificate-loading API is the shakiest part
        // of this adapter; see DESIGN.md for the open question it leaves.
        let _ = identity;
    }

    let dtls_conn = dtls::conn::DTLSConn::new(net_conn, config, true, None)
        .await
        .map_err(|err| TapsError::Security(err.to_string()))?;
    Ok(Adapter::Datagram(Dgram::new_dtls(Arc::new(dtls_conn), Some(remote))))
}

#[cfg(not(feature = "dtls"))]
async fn connect_dtls(_candidate: Candidate, _security: Option<SecurityParameters>) -> Result<Adapter> {
    Err(TapsError::NotSupported("crate built without the \"dtls\" feature".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn expand_local_defaults_to_unbound() {
        assert_eq!(expand_local(&None), vec![None]);
    }

    #[test]
    fn expand_local_honors_explicit_addresses() {
        let ep = LocalEndpoint::new().with_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        let expanded = expand_local(&Some(ep));
        assert_eq!(expanded, vec![Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)))]);
    }
}
