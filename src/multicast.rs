//! Multicast receive collaborator contract (§6).
//!
//! The reference implementation this crate's design was distilled from
//! delegates multicast group membership to a native `multicast_glue`
//! extension reached through `initialize`/`join`/`leave` calls keyed on an
//! asyncio-loop-scoped handle. This crate expresses the same three-call
//! contract as a trait so an embedder can supply a real collaborator; by
//! default, no multicast support is compiled in.

use crate::error::{Result, TapsError};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Opaque join handle returned by [`MulticastJoin::join`] and consumed by
/// [`MulticastJoin::leave`].
pub struct MulticastCtx {
    pub(crate) group: IpAddr,
    pub(crate) port: u16,
}

/// Collaborator contract for joining and leaving a multicast group.
#[async_trait]
pub trait MulticastJoin: Send + Sync {
    /// Bind the collaborator to the runtime that will drive delivered
    /// packets. Called once before the first `join`.
    async fn initialize(&self, handle: &Handle) -> Result<()>;

    /// Join `group` (optionally source-filtered) on `port`, delivering
    /// received `(payload, source_addr)` pairs on `sink`.
    async fn join(
        &self,
        group: IpAddr,
        source: Option<IpAddr>,
        port: u16,
        sink: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    ) -> Result<MulticastCtx>;

    /// Leave a group previously joined.
    async fn leave(&self, ctx: MulticastCtx) -> Result<()>;
}

/// Default collaborator: every call reports `NotSupported` (§9 design note —
/// multicast requires a real collaborator to be supplied).
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedMulticast;

#[async_trait]
impl MulticastJoin for UnsupportedMulticast {
    async fn initialize(&self, _handle: &Handle) -> Result<()> {
        Err(TapsError::NotSupported("multicast receive".into()))
    }

    async fn join(
        &self,
        _group: IpAddr,
        _source: Option<IpAddr>,
        _port: u16,
        _sink: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    ) -> Result<MulticastCtx> {
        Err(TapsError::NotSupported("multicast receive".into()))
    }

    async fn leave(&self, _ctx: MulticastCtx) -> Result<()> {
        Err(TapsError::NotSupported("multicast receive".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_collaborator_refuses_every_operation() {
        let collaborator = UnsupportedMulticast;
        let handle = Handle::current();
        assert!(matches!(
            collaborator.initialize(&handle).await,
            Err(TapsError::NotSupported(_))
        ));
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            collaborator
                .join("224.0.0.1".parse().unwrap(), None, 5000, tx)
                .await,
            Err(TapsError::NotSupported(_))
        ));
    }
}
