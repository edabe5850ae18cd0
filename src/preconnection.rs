//! Preconnection (C11): immutable-after-build intent bundle, the entry point
//! for `initiate` and `listen` (§4.7).

use crate::connection::Connection;
use crate::endpoint::{LocalEndpoint, RemoteEndpoint};
use crate::framer::Framer;
use crate::listener::Listener;
use crate::multicast::MulticastJoin;
use crate::properties::TransportProperties;
use crate::racing;
use crate::security::SecurityParameters;
use crate::yang::{self, Format};
use crate::{Result, TapsError};
use std::sync::Arc;
use tokio::runtime::Handle;

/// A reusable description of a connection's endpoints, properties, and
/// security requirements, from which `initiate`/`listen` spawn real work.
#[derive(Clone)]
pub struct Preconnection {
    local_endpoint: Option<LocalEndpoint>,
    remote_endpoint: Option<RemoteEndpoint>,
    transport_properties: TransportProperties,
    security_parameters: Option<SecurityParameters>,
    framer: Option<Arc<dyn Framer>>,
    multicast: Option<Arc<dyn MulticastJoin>>,
    handle: Handle,
}

impl Preconnection {
    /// Start building a Preconnection, capturing the ambient runtime handle
    /// (§5, §9: no process-wide global loop).
    pub fn new() -> Self {
        Self {
            local_endpoint: None,
            remote_endpoint: None,
            transport_properties: TransportProperties::default(),
            security_parameters: None,
            framer: None,
            multicast: None,
            handle: Handle::current(),
        }
    }

    pub fn with_local_endpoint(mut self, endpoint: LocalEndpoint) -> Self {
        self.local_endpoint = Some(endpoint);
        self
    }

    pub fn with_remote_endpoint(mut self, endpoint: RemoteEndpoint) -> Self {
        self.remote_endpoint = Some(endpoint);
        self
    }

    pub fn with_transport_properties(mut self, properties: TransportProperties) -> Self {
        self.transport_properties = properties;
        self
    }

    pub fn with_security_parameters(mut self, parameters: SecurityParameters) -> Self {
        self.security_parameters = Some(parameters);
        self
    }

    /// Install the application framer used by every Connection/Listener
    /// spawned from this Preconnection.
    pub fn add_framer(mut self, framer: Arc<dyn Framer>) -> Self {
        self.framer = Some(framer);
        self
    }

    /// Install the multicast join/leave collaborator (§6). Without one,
    /// a multicast local address on `listen` is skipped rather than joined.
    pub fn with_multicast_collaborator(mut self, collaborator: Arc<dyn MulticastJoin>) -> Self {
        self.multicast = Some(collaborator);
        self
    }

    pub fn local_endpoint(&self) -> Option<&LocalEndpoint> {
        self.local_endpoint.as_ref()
    }

    pub fn remote_endpoint(&self) -> Option<&RemoteEndpoint> {
        self.remote_endpoint.as_ref()
    }

    pub fn transport_properties(&self) -> &TransportProperties {
        &self.transport_properties
    }

    pub fn security_parameters(&self) -> Option<&SecurityParameters> {
        self.security_parameters.as_ref()
    }

    /// Actively open a connection. Returns immediately with a Connection in
    /// the Establishing state; the race outcome arrives on its event stream
    /// (§4.7, §5).
    pub fn initiate(&self) -> Result<Connection> {
        let remote = self
            .remote_endpoint
            .clone()
            .ok_or_else(|| TapsError::InvalidParameters("initiate requires a remote endpoint".into()))?;

        let connection = Connection::establishing();
        let inner = connection.inner();
        let local = self.local_endpoint.clone();
        let properties = self.transport_properties.clone();
        let security = self.security_parameters.clone();
        let framer = self.framer.clone();

        self.handle.spawn(async move {
            racing::race(local, remote, properties, security, framer, inner).await;
        });

        Ok(connection)
    }

    /// Passively open a listener, binding every viable (protocol,
    /// local-address) candidate (§4.6, §4.7).
    pub async fn listen(&self) -> Result<Listener> {
        let local = self
            .local_endpoint
            .clone()
            .ok_or_else(|| TapsError::InvalidParameters("listen requires a local endpoint".into()))?;

        Listener::bind(
            local,
            self.transport_properties.clone(),
            self.security_parameters.clone(),
            self.framer.clone(),
            self.multicast.clone(),
        )
        .await
    }

    /// Build a Preconnection from the documented YANG-shaped XML/JSON
    /// document (§6).
    pub fn from_yang(format: Format, document: &str) -> Result<Self> {
        yang::from_yang(format, document)
    }

    /// Serialize this Preconnection's endpoints/properties/security back to
    /// the documented YANG shape (§6, round-trip law in §8).
    pub fn to_yang(&self, format: Format) -> Result<String> {
        yang::to_yang(self, format)
    }
}

impl Default for Preconnection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initiate_without_remote_endpoint_is_a_synchronous_error() {
        let pre = Preconnection::new();
        let err = pre.initiate().unwrap_err();
        assert!(matches!(err, TapsError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn listen_without_local_endpoint_is_a_synchronous_error() {
        let pre = Preconnection::new();
        let err = pre.listen().await.unwrap_err();
        assert!(matches!(err, TapsError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn initiate_with_remote_endpoint_returns_establishing_handle() {
        use crate::connection::ConnectionState;
        let pre = Preconnection::new()
            .with_remote_endpoint(RemoteEndpoint::new().with_hostname("127.0.0.1").with_port(1));
        let connection = pre.initiate().unwrap();
        assert_eq!(connection.state().await, ConnectionState::Establishing);
    }

    #[tokio::test]
    async fn initiate_over_tcp_establishes_and_echoes_a_message() {
        use crate::connection::{ConnectionEvent, ConnectionState};
        use std::net::{IpAddr, Ipv4Addr};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let pre = Preconnection::new().with_remote_endpoint(
            RemoteEndpoint::new()
                .with_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .with_port(port),
        );
        let mut connection = pre.initiate().unwrap();

        loop {
            match connection.events().recv().await {
                Some(ConnectionEvent::Ready) => break,
                Some(ConnectionEvent::InitiateError(err)) => panic!("initiate failed: {err}"),
                Some(_) => continue,
                None => panic!("event stream closed before Ready"),
            }
        }
        assert_eq!(connection.state().await, ConnectionState::Established);

        connection.send(b"hello".to_vec()).await;
        assert!(matches!(
            connection.events().recv().await,
            Some(ConnectionEvent::Sent(_))
        ));

        connection.receive(0, None);
        match connection.events().recv().await {
            Some(ConnectionEvent::Received { message, .. }) => {
                assert_eq!(message.into_data(), b"hello".to_vec());
            }
            other => panic!("expected Received, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn initiate_with_reliability_prohibited_races_datagram_protocols() {
        use crate::connection::ConnectionEvent;
        use crate::properties::TransportProperties;
        use std::net::{IpAddr, Ipv4Addr};
        use tokio::net::UdpSocket;

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
            socket.send_to(&buf[..n], peer).await.unwrap();
        });

        let mut properties = TransportProperties::new();
        properties.prohibit("reliability");
        properties.ignore("preserve-order");
        properties.ignore("congestion-control");

        let pre = Preconnection::new()
            .with_remote_endpoint(
                RemoteEndpoint::new()
                    .with_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
                    .with_port(port),
            )
            .with_transport_properties(properties);
        let mut connection = pre.initiate().unwrap();

        loop {
            match connection.events().recv().await {
                Some(ConnectionEvent::Ready) => break,
                Some(ConnectionEvent::InitiateError(err)) => panic!("initiate failed: {err}"),
                Some(_) => continue,
                None => panic!("event stream closed before Ready"),
            }
        }

        connection.send(b"ping".to_vec()).await;
        assert!(matches!(
            connection.events().recv().await,
            Some(ConnectionEvent::Sent(_))
        ));
        connection.receive(0, None);
        match connection.events().recv().await {
            Some(ConnectionEvent::Received { message, .. }) => {
                assert_eq!(message.into_data(), b"ping".to_vec());
            }
            other => panic!("expected Received, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn initiate_against_nothing_listening_surfaces_initiate_error() {
        use crate::connection::ConnectionEvent;
        use std::net::{IpAddr, Ipv4Addr};
        use tokio::net::TcpListener;

        // Bind and immediately drop to obtain a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let pre = Preconnection::new().with_remote_endpoint(
            RemoteEndpoint::new()
                .with_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .with_port(port),
        );
        let mut connection = pre.initiate().unwrap();

        match connection.events().recv().await {
            Some(ConnectionEvent::InitiateError(_)) => {}
            other => panic!("expected InitiateError, got {other:?}"),
        }
    }
}
