//! The static protocol registry (C3).
//!
//! Capability tables are ported from the upstream TAPS reference
//! implementation's `transportProperties.get_protocols()` (its capability
//! JSON blobs), trimmed to the protocols this crate actually has an adapter
//! for (§3 Non-goals: SCTP/QUIC/MPTCP are not implemented, so they are not
//! registered — the selector must never recommend a protocol nothing can
//! dial).

use crate::properties::PropertyKey;

/// A transport protocol this crate can establish a connection over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    TlsOverTcp,
    DtlsOverUdp,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::TlsOverTcp => "tls-tcp",
            Protocol::DtlsOverUdp => "dtls-udp",
        }
    }

    /// Whether this protocol carries datagrams (no stream framing, no
    /// partial delivery) as opposed to a byte stream.
    pub fn is_datagram(&self) -> bool {
        matches!(self, Protocol::Udp | Protocol::DtlsOverUdp)
    }

    /// Whether this protocol needs TLS/DTLS security parameters to dial.
    pub fn is_secure(&self) -> bool {
        matches!(self, Protocol::TlsOverTcp | Protocol::DtlsOverUdp)
    }
}

/// A capability value for one property on one protocol (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Yes,
    No,
    /// Counts as satisfying a Require and as violating no Prohibit, but also
    /// counts as `true` for Prefer/Avoid scoring.
    Optional,
}

impl Capability {
    fn satisfies_require(self) -> bool {
        !matches!(self, Capability::No)
    }

    fn violates_prohibit(self) -> bool {
        matches!(self, Capability::Yes)
    }

    fn counts_for_preference(self) -> bool {
        !matches!(self, Capability::No)
    }
}

/// Capability record for a single protocol: a value for every well-known
/// property key (§3).
#[derive(Debug, Clone, Copy)]
pub struct ProtocolDescriptor {
    pub protocol: Protocol,
    reliability: Capability,
    preserve_msg_boundaries: Capability,
    per_msg_reliability: Capability,
    preserve_order: Capability,
    zero_rtt_msg: Capability,
    multistreaming: Capability,
    per_msg_checksum_len_send: Capability,
    per_msg_checksum_len_recv: Capability,
    congestion_control: Capability,
    multipath: Capability,
    retransmit_notify: Capability,
    soft_error_notify: Capability,
}

impl ProtocolDescriptor {
    pub(crate) fn capability(&self, key: PropertyKey) -> Capability {
        match key {
            PropertyKey::Reliability => self.reliability,
            PropertyKey::PreserveMsgBoundaries => self.preserve_msg_boundaries,
            PropertyKey::PerMsgReliability => self.per_msg_reliability,
            PropertyKey::PreserveOrder => self.preserve_order,
            PropertyKey::ZeroRttMsg => self.zero_rtt_msg,
            PropertyKey::Multistreaming => self.multistreaming,
            PropertyKey::PerMsgChecksumLenSend => self.per_msg_checksum_len_send,
            PropertyKey::PerMsgChecksumLenRecv => self.per_msg_checksum_len_recv,
            PropertyKey::CongestionControl => self.congestion_control,
            PropertyKey::Multipath => self.multipath,
            PropertyKey::RetransmitNotify => self.retransmit_notify,
            PropertyKey::SoftErrorNotify => self.soft_error_notify,
        }
    }

    pub(crate) fn satisfies_require(&self, key: PropertyKey) -> bool {
        self.capability(key).satisfies_require()
    }

    pub(crate) fn violates_prohibit(&self, key: PropertyKey) -> bool {
        self.capability(key).violates_prohibit()
    }

    pub(crate) fn counts_for_preference(&self, key: PropertyKey) -> bool {
        self.capability(key).counts_for_preference()
    }
}

/// The static capability table, in registry order (ties in the selector's
/// sort retain this order).
pub fn registry() -> Vec<ProtocolDescriptor> {
    use Capability::{No, Optional, Yes};
    vec![
        ProtocolDescriptor {
            protocol: Protocol::Tcp,
            reliability: Yes,
            preserve_msg_boundaries: No,
            per_msg_reliability: No,
            preserve_order: Yes,
            zero_rtt_msg: Optional,
            multistreaming: Optional,
            per_msg_checksum_len_send: No,
            per_msg_checksum_len_recv: No,
            congestion_control: Yes,
            multipath: Optional,
            retransmit_notify: Yes,
            soft_error_notify: Yes,
        },
        ProtocolDescriptor {
            protocol: Protocol::Udp,
            reliability: No,
            preserve_msg_boundaries: Yes,
            per_msg_reliability: No,
            preserve_order: No,
            zero_rtt_msg: Yes,
            multistreaming: No,
            per_msg_checksum_len_send: No,
            per_msg_checksum_len_recv: No,
            congestion_control: No,
            multipath: No,
            retransmit_notify: No,
            soft_error_notify: Yes,
        },
        ProtocolDescriptor {
            protocol: Protocol::TlsOverTcp,
            reliability: Yes,
            preserve_msg_boundaries: No,
            per_msg_reliability: No,
            preserve_order: Yes,
            zero_rtt_msg: Yes,
            multistreaming: No,
            per_msg_checksum_len_send: No,
            per_msg_checksum_len_recv: No,
            congestion_control: Yes,
            multipath: No,
            retransmit_notify: No,
            soft_error_notify: No,
        },
        ProtocolDescriptor {
            protocol: Protocol::DtlsOverUdp,
            reliability: No,
            preserve_msg_boundaries: Yes,
            per_msg_reliability: No,
            preserve_order: No,
            zero_rtt_msg: No,
            multistreaming: No,
            per_msg_checksum_len_send: No,
            per_msg_checksum_len_recv: No,
            congestion_control: No,
            multipath: No,
            retransmit_notify: No,
            soft_error_notify: Yes,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_minimum_catalog() {
        let protocols: Vec<_> = registry().into_iter().map(|d| d.protocol).collect();
        assert_eq!(
            protocols,
            vec![
                Protocol::Tcp,
                Protocol::Udp,
                Protocol::TlsOverTcp,
                Protocol::DtlsOverUdp
            ]
        );
    }

    #[test]
    fn optional_satisfies_require_and_no_prohibit() {
        let cap = Capability::Optional;
        assert!(cap.satisfies_require());
        assert!(!cap.violates_prohibit());
        assert!(cap.counts_for_preference());
    }
}
