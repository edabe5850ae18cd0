//! Security parameters (C4).
//!
//! The core treats identity material and trust anchors as opaque bytes; it
//! never parses or validates them. They are handed to the TLS/DTLS adapters
//! verbatim at dial/listen time (§4.4).

/// Identity material and trust anchors for a connection's security context.
///
/// Mirrors the upstream reference implementation's `SecurityParameters`
/// (`addIdentity`/`addTrustCA`), generalized to hold raw PEM/DER bytes instead
/// of opaque handles.
#[derive(Debug, Clone, Default)]
pub struct SecurityParameters {
    identity: Option<Identity>,
    trusted_ca: Vec<Vec<u8>>,
    alpn: Vec<String>,
    disabled: bool,
}

/// A local identity: certificate chain plus its private key, both PEM or DER
/// encoded, opaque to the core.
#[derive(Debug, Clone)]
pub struct Identity {
    pub certificate_chain: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl SecurityParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicitly request no security (plain TCP/UDP candidates only).
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Add the local identity used to prove identity to a remote peer.
    pub fn add_identity(mut self, certificate_chain: Vec<u8>, private_key: Vec<u8>) -> Self {
        self.identity = Some(Identity {
            certificate_chain,
            private_key,
        });
        self
    }

    /// Add a certificate to be trusted as a root of the peer's chain.
    pub fn add_trust_ca(mut self, cert: Vec<u8>) -> Self {
        self.trusted_ca.push(cert);
        self
    }

    /// Offer an ALPN protocol identifier during the handshake.
    pub fn with_alpn(mut self, protocol: impl Into<String>) -> Self {
        self.alpn.push(protocol.into());
        self
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn trusted_ca(&self) -> &[Vec<u8>] {
        &self.trusted_ca
    }

    pub fn alpn(&self) -> &[String] {
        &self.alpn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_trust_anchors() {
        let params = SecurityParameters::new()
            .add_trust_ca(b"ca-one".to_vec())
            .add_trust_ca(b"ca-two".to_vec());
        assert_eq!(params.trusted_ca().len(), 2);
        assert!(!params.is_disabled());
    }

    #[test]
    fn disabled_carries_no_identity() {
        let params = SecurityParameters::disabled();
        assert!(params.is_disabled());
        assert!(params.identity().is_none());
    }
}
