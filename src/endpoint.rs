//! Endpoint descriptors (C1).
//!
//! A [`LocalEndpoint`] and [`RemoteEndpoint`] are plain value objects: they
//! describe an attachment point, they do not resolve it. Resolution (DNS,
//! interface enumeration) is performed by the racing engine and listener
//! (§4.2, §4.6), which turn an endpoint into a fresh, ordered list of
//! `IpAddr`s without mutating the endpoint itself.

use std::net::IpAddr;

/// A local attachment point: an interface, an address, and/or a port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalEndpoint {
    pub(crate) interface: Option<String>,
    pub(crate) addresses: Vec<IpAddr>,
    pub(crate) host_name: Option<String>,
    pub(crate) port: Option<u16>,
}

impl LocalEndpoint {
    /// Start building a local endpoint with no attributes set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict this endpoint to a named network interface (e.g. `"eth0"`).
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Add an IP literal this endpoint should bind to. May be called more
    /// than once to offer several addresses.
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.addresses.push(address);
        self
    }

    /// Bind by resolving a host name instead of a literal address.
    pub fn with_hostname(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    /// Fix the local port. Leave unset to let the OS choose one.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    pub fn host_name(&self) -> Option<&str> {
        self.host_name.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

/// A remote attachment point: a host name and/or address set, and a port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub(crate) addresses: Vec<IpAddr>,
    pub(crate) host_name: Option<String>,
    pub(crate) port: Option<u16>,
}

impl RemoteEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an IP literal as a remote candidate address.
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.addresses.push(address);
        self
    }

    /// Connect by resolving a host name via DNS (§4.2 step 1).
    pub fn with_hostname(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    pub fn host_name(&self) -> Option<&str> {
        self.host_name.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

/// Split an address list into (IPv6, IPv4) order, per the "IPv6 before IPv4"
/// rule applied throughout resolution and enumeration (§3, §4.2).
pub(crate) fn partition_v6_then_v4(addrs: impl IntoIterator<Item = IpAddr>) -> Vec<IpAddr> {
    let mut v6 = Vec::new();
    let mut v4 = Vec::new();
    for addr in addrs {
        match addr {
            IpAddr::V6(_) => v6.push(addr),
            IpAddr::V4(_) => v4.push(addr),
        }
    }
    v6.extend(v4);
    v6
}

/// Drop link-local IPv6 addresses, as required for locally-bound candidates
/// (§3: "Link-local IPv6 is filtered out from locally-bound candidates").
pub(crate) fn filter_link_local(addrs: Vec<IpAddr>) -> Vec<IpAddr> {
    addrs
        .into_iter()
        .filter(|addr| match addr {
            IpAddr::V6(v6) => !is_unicast_link_local(v6),
            IpAddr::V4(_) => true,
        })
        .collect()
}

fn is_unicast_link_local(addr: &std::net::Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::net::Ipv6Addr;

    #[test]
    fn builder_accumulates_addresses() {
        let ep = LocalEndpoint::new()
            .with_address(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
            .with_address(IpAddr::V6(Ipv6Addr::LOCALHOST))
            .with_port(8080);
        assert_eq!(ep.addresses().len(), 2);
        assert_eq!(ep.port(), Some(8080));
    }

    #[test]
    fn v6_sorts_before_v4() {
        let v4 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        let sorted = partition_v6_then_v4(vec![v4, v6]);
        assert_eq!(sorted, vec![v6, v4]);
    }

    #[test]
    fn link_local_v6_is_filtered() {
        let link_local = IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1));
        let global = IpAddr::V6(Ipv6Addr::LOCALHOST);
        let filtered = filter_link_local(vec![link_local, global]);
        assert_eq!(filtered, vec![global]);
    }
}
