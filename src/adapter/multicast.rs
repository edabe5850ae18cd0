//! Multicast receive adapter: wraps a `MulticastJoin` collaborator's delivery
//! channel behind the same write/read/close/peer_addr shape as the other
//! adapters (§4.6, §6). Send is always refused; multicast send is a
//! documented non-goal.

use crate::endpoint::RemoteEndpoint;
use crate::message::MessageContext;
use crate::{Result, TapsError};
use std::net::SocketAddr;
use tokio::sync::{mpsc, Mutex};

pub(crate) struct McastAdapter {
    inbox: Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
}

impl McastAdapter {
    pub(crate) fn new(inbox: mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>) -> Self {
        Self {
            inbox: Mutex::new(inbox),
        }
    }

    pub(crate) async fn write(&self, _data: &[u8]) -> Result<()> {
        Err(TapsError::NotSupported("multicast send".into()))
    }

    pub(crate) async fn read(&self) -> Result<(Vec<u8>, MessageContext, bool)> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some((data, from)) => {
                let context = MessageContext::new().with_remote_endpoint(
                    RemoteEndpoint::new().with_address(from.ip()).with_port(from.port()),
                );
                Ok((data, context, true))
            }
            None => Err(TapsError::Connection("multicast collaborator channel closed".into())),
        }
    }

    pub(crate) async fn close(&self) -> Result<()> {
        Ok(())
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}
