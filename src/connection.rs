//! Connection (C8): state machine, message accounting, and the typed event
//! stream a caller polls instead of registering `on_*` callbacks (§9).

use crate::adapter::Adapter;
use crate::message::{Message, MessageContext};
use crate::multicast::{MulticastCtx, MulticastJoin};
use crate::TapsError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Lifecycle state of a Connection (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Establishing,
    Established,
    Closing,
    Closed,
}

/// Events delivered on a Connection's event stream, replacing the `on_*`
/// callback surface of the system this crate's design was distilled from
/// (§9).
#[derive(Debug)]
pub enum ConnectionEvent {
    Ready,
    InitiateError(TapsError),
    ConnectionReceived,
    Sent(u64),
    SendError(u64, TapsError),
    Expired(u64),
    Received { message: Message, context: MessageContext },
    ReceivedPartial { message: Message, context: MessageContext, eom: bool },
    ReceiveError(TapsError),
    ConnectionError(TapsError),
    Closed,
}

pub(crate) struct ConnectionInner {
    state: Mutex<ConnectionState>,
    next_ref: AtomicU64,
    adapter: Mutex<Option<Arc<Adapter>>>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    multicast: Option<(Arc<dyn MulticastJoin>, Mutex<Option<MulticastCtx>>)>,
}

impl ConnectionInner {
    fn alloc_ref(&self) -> u64 {
        self.next_ref.fetch_add(1, Ordering::SeqCst)
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events_tx.send(event);
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.lock().await = state;
    }
}

/// A transport-agnostic connection. Obtained from
/// [`crate::preconnection::Preconnection::initiate`],
/// [`crate::preconnection::Preconnection::listen`], or a Listener's
/// `ConnectionReceived` event.
pub struct Connection {
    pub(crate) inner: Arc<ConnectionInner>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Connection {
    /// Construct a Connection already bound to an established adapter (the
    /// listener accept/demux path, where there is no race to wait for).
    pub(crate) fn established(adapter: Adapter) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ConnectionInner {
            state: Mutex::new(ConnectionState::Established),
            next_ref: AtomicU64::new(1),
            adapter: Mutex::new(Some(Arc::new(adapter))),
            events_tx,
            multicast: None,
        });
        Self { inner, events_rx }
    }

    /// Construct a Connection in the Establishing state, to be completed
    /// later by the racing engine via [`Connection::install_adapter`] or
    /// [`Connection::fail_initiate`].
    pub(crate) fn establishing() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ConnectionInner {
            state: Mutex::new(ConnectionState::Establishing),
            next_ref: AtomicU64::new(1),
            adapter: Mutex::new(None),
            events_tx,
            multicast: None,
        });
        Self { inner, events_rx }
    }

    pub(crate) fn with_multicast(mut self, join: Arc<dyn MulticastJoin>, ctx: MulticastCtx) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_multicast must run before the Connection is shared");
        inner.multicast = Some((join, Mutex::new(Some(ctx))));
        self
    }

    pub(crate) fn inner(&self) -> Arc<ConnectionInner> {
        self.inner.clone()
    }

    /// Called by the racing engine when a candidate wins (§4.2).
    pub(crate) async fn install_adapter(inner: &Arc<ConnectionInner>, adapter: Adapter) {
        *inner.adapter.lock().await = Some(Arc::new(adapter));
        inner.set_state(ConnectionState::Established).await;
        inner.emit(ConnectionEvent::Ready);
    }

    /// Called by the racing engine when every candidate failed (§4.2, §7).
    pub(crate) async fn fail_initiate(inner: &Arc<ConnectionInner>, err: TapsError) {
        inner.emit(ConnectionEvent::InitiateError(err));
        inner.set_state(ConnectionState::Closed).await;
        inner.emit(ConnectionEvent::Closed);
    }

    /// Send `data`. Returns the message reference immediately; the eventual
    /// outcome arrives as `Sent`/`SendError` on the event stream (§4.5).
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> u64 {
        let msg_ref = self.inner.alloc_ref();
        let data = data.into();
        let state = *self.inner.state.lock().await;
        if state != ConnectionState::Established {
            self.inner.emit(ConnectionEvent::SendError(
                msg_ref,
                TapsError::InvalidState("connection is not established".into()),
            ));
            return msg_ref;
        }
        let adapter = self.inner.adapter.lock().await.clone();
        match adapter {
            Some(adapter) => {
                let context = MessageContext::new();
                match adapter.write(&data, &context, true).await {
                    Ok(()) => self.inner.emit(ConnectionEvent::Sent(msg_ref)),
                    Err(err) => self.inner.emit(ConnectionEvent::SendError(msg_ref, err)),
                }
            }
            None => self.inner.emit(ConnectionEvent::SendError(
                msg_ref,
                TapsError::InvalidState("no adapter bound".into()),
            )),
        }
        msg_ref
    }

    /// Request a message. `max_length = None` means "take everything
    /// available" (§4.3). The result arrives as `Received`/
    /// `ReceivedPartial`/`ReceiveError` on the event stream.
    pub fn receive(&self, min_incomplete_length: usize, max_length: Option<usize>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let adapter = inner.adapter.lock().await.clone();
            let Some(adapter) = adapter else {
                inner.emit(ConnectionEvent::ReceiveError(TapsError::InvalidState(
                    "no adapter bound".into(),
                )));
                return;
            };
            match adapter.read(min_incomplete_length, max_length).await {
                Ok((data, context, eom)) => {
                    let message = Message::new(data);
                    if eom || adapter.is_datagram() {
                        inner.emit(ConnectionEvent::Received { message, context });
                    } else {
                        inner.emit(ConnectionEvent::ReceivedPartial { message, context, eom });
                    }
                }
                Err(err) => inner.emit(ConnectionEvent::ReceiveError(err)),
            }
        });
    }

    /// Close the connection: leaves an active multicast join, closes the
    /// adapter, then emits `Closed` (§4.5).
    pub async fn close(&self) {
        self.inner.set_state(ConnectionState::Closing).await;
        if let Some((join, ctx)) = &self.inner.multicast {
            if let Some(ctx) = ctx.lock().await.take() {
                let _ = join.leave(ctx).await;
            }
        }
        if let Some(adapter) = self.inner.adapter.lock().await.take() {
            let _ = adapter.close().await;
        }
        self.inner.set_state(ConnectionState::Closed).await;
        self.inner.emit(ConnectionEvent::Closed);
    }

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.lock().await
    }

    /// The typed event stream (§4.5, §9): poll this instead of registering
    /// per-event callbacks.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<ConnectionEvent> {
        &mut self.events_rx
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_before_established_emits_send_error() {
        let mut conn = Connection::establishing();
        let msg_ref = conn.send(b"hi".to_vec()).await;
        assert_eq!(msg_ref, 1);
        match conn.events().recv().await {
            Some(ConnectionEvent::SendError(r, _)) => assert_eq!(r, 1),
            other => panic!("expected SendError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refs_are_strictly_increasing() {
        let conn = Connection::establishing();
        let a = conn.inner.alloc_ref();
        let b = conn.inner.alloc_ref();
        assert!(b > a);
    }

    #[tokio::test]
    async fn fail_initiate_emits_error_then_closed() {
        let conn = Connection::establishing();
        let inner = conn.inner();
        Connection::fail_initiate(&inner, TapsError::Selection).await;
        let mut conn = conn;
        assert!(matches!(
            conn.events().recv().await,
            Some(ConnectionEvent::InitiateError(_))
        ));
        assert!(matches!(conn.events().recv().await, Some(ConnectionEvent::Closed)));
        assert_eq!(conn.state().await, ConnectionState::Closed);
    }
}
