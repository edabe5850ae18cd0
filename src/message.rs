//! Messages and message context (part of C7/C8).

use crate::endpoint::{LocalEndpoint, RemoteEndpoint};
use std::time::{Duration, Instant};

/// The unit of data handed to [`crate::connection::Connection::send`] and
/// returned from `receive` events.
#[derive(Debug, Clone)]
pub struct Message {
    data: Vec<u8>,
    lifetime: Option<Duration>,
    priority: Option<i32>,
    idempotent: bool,
    final_message: bool,
}

impl Message {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            lifetime: None,
            priority: None,
            idempotent: false,
            final_message: false,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }

    pub fn from_string(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// A per-message deadline past which the message should no longer be
    /// sent (§4.5, `Expired`; no shipped adapter currently enforces this).
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    pub fn final_message(mut self) -> Self {
        self.final_message = true;
        self
    }

    pub fn is_final(&self) -> bool {
        self.final_message
    }
}

/// ECN marking carried alongside a received message, when the platform
/// exposes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcnMarking {
    NotEct,
    Ect0,
    Ect1,
    Ce,
}

/// Context accompanying a message, on send or receive.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub received_at: Instant,
    pub local_endpoint: Option<LocalEndpoint>,
    pub remote_endpoint: Option<RemoteEndpoint>,
    pub early_data: bool,
    pub ecn: Option<EcnMarking>,
}

impl MessageContext {
    pub fn new() -> Self {
        Self {
            received_at: Instant::now(),
            local_endpoint: None,
            remote_endpoint: None,
            early_data: false,
            ecn: None,
        }
    }

    pub fn with_remote_endpoint(mut self, endpoint: RemoteEndpoint) -> Self {
        self.remote_endpoint = Some(endpoint);
        self
    }

    pub fn with_local_endpoint(mut self, endpoint: LocalEndpoint) -> Self {
        self.local_endpoint = Some(endpoint);
        self
    }

    pub fn with_ecn(mut self, ecn: EcnMarking) -> Self {
        self.ecn = Some(ecn);
        self
    }
}

impl Default for MessageContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_flags() {
        let msg = Message::from_string("hi").idempotent().final_message();
        assert!(msg.is_idempotent());
        assert!(msg.is_final());
        assert_eq!(msg.data(), b"hi");
    }
}
