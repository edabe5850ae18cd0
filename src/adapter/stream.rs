//! Stream transport adapter: TCP and TLS-over-TCP (§4.3).

use crate::framer::{DeframeDriver, Framer, DEFAULT_FAILURE_BUDGET};
use crate::message::MessageContext;
use crate::{Result, TapsError};
use bytes::BytesMut;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// A stream-oriented transport: a boxed, split byte stream plus the
/// buffering and framer-driving state shared by TCP and TLS-over-TCP (they
/// differ only in how the underlying `AsyncRead + AsyncWrite` was produced).
pub(crate) struct StreamAdapter {
    write_half: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    read_half: Mutex<Box<dyn AsyncRead + Send + Unpin>>,
    buffer: Mutex<BytesMut>,
    at_eof: AtomicBool,
    peer: Option<SocketAddr>,
    framer: Option<Arc<dyn Framer>>,
    deframe_driver: Mutex<DeframeDriver>,
    /// Ordered queue of deframed application messages not yet handed to a
    /// reader (§3, §4.4): `drive` may decode several messages per socket
    /// read, but each `read_framed` call returns exactly one.
    framer_buffer: Mutex<VecDeque<(MessageContext, Vec<u8>, bool)>>,
    read_lock: Mutex<()>,
}

impl StreamAdapter {
    pub(crate) fn new(
        read_half: Box<dyn AsyncRead + Send + Unpin>,
        write_half: Box<dyn AsyncWrite + Send + Unpin>,
        peer: Option<SocketAddr>,
        framer: Option<Arc<dyn Framer>>,
    ) -> Self {
        Self {
            write_half: Mutex::new(write_half),
            read_half: Mutex::new(read_half),
            buffer: Mutex::new(BytesMut::new()),
            at_eof: AtomicBool::new(false),
            peer,
            framer,
            deframe_driver: Mutex::new(DeframeDriver::new(DEFAULT_FAILURE_BUDGET)),
            framer_buffer: Mutex::new(VecDeque::new()),
            read_lock: Mutex::new(()),
        }
    }

    pub(crate) async fn write(&self, data: &[u8], context: &MessageContext, eom: bool) -> Result<()> {
        let framed = match &self.framer {
            Some(f) => f.encode(data, context, eom).await?,
            None => data.to_vec(),
        };
        let mut w = self.write_half.lock().await;
        w.write_all(&framed).await.map_err(TapsError::Io)
    }

    async fn fill_from_socket(&self) -> Result<bool> {
        let mut chunk = [0u8; 8192];
        let n = {
            let mut r = self.read_half.lock().await;
            r.read(&mut chunk).await.map_err(TapsError::Io)?
        };
        if n == 0 {
            self.at_eof.store(true, Ordering::Release);
            return Ok(false);
        }
        let mut buffer = self.buffer.lock().await;
        buffer.extend_from_slice(&chunk[..n]);
        Ok(true)
    }

    /// Unframed receive: wait for at least `min_incomplete` bytes (or EOF),
    /// then take up to `max_length` bytes (§4.3).
    async fn read_raw(&self, min_incomplete: usize, max_length: Option<usize>) -> Result<(Vec<u8>, MessageContext, bool)> {
        loop {
            {
                let buffer = self.buffer.lock().await;
                if buffer.len() >= min_incomplete.max(1) || self.at_eof.load(Ordering::Acquire) {
                    break;
                }
            }
            if !self.fill_from_socket().await? {
                break;
            }
        }
        let mut buffer = self.buffer.lock().await;
        let take = max_length.unwrap_or(buffer.len()).min(buffer.len());
        let data = buffer.split_to(take).to_vec();
        let eom = self.at_eof.load(Ordering::Acquire) || buffer.is_empty();
        Ok((data, MessageContext::new(), eom))
    }

    /// Framed receive: pop one message off the framer buffer, pulling from
    /// the socket and draining newly decoded messages into it until at
    /// least one is available (§3, §4.4).
    async fn read_framed(&self, framer: &Arc<dyn Framer>) -> Result<(Vec<u8>, MessageContext, bool)> {
        loop {
            {
                let mut framer_buffer = self.framer_buffer.lock().await;
                if let Some((context, data, eom)) = framer_buffer.pop_front() {
                    return Ok((data, context, eom));
                }
            }
            {
                let mut buffer = self.buffer.lock().await;
                let mut decoded = Vec::new();
                let mut driver = self.deframe_driver.lock().await;
                driver.drive(framer.as_ref(), &mut buffer, &mut decoded)?;
                if !decoded.is_empty() {
                    self.framer_buffer.lock().await.extend(decoded);
                    continue;
                }
            }
            if self.at_eof.load(Ordering::Acquire) {
                return Err(TapsError::Receive("peer closed mid-message".into()));
            }
            self.fill_from_socket().await?;
        }
    }

    pub(crate) async fn read(&self, min_incomplete: usize, max_length: Option<usize>) -> Result<(Vec<u8>, MessageContext, bool)> {
        let _guard = self.read_lock.lock().await;
        match &self.framer {
            Some(framer) => self.read_framed(framer).await,
            None => self.read_raw(min_incomplete, max_length).await,
        }
    }

    pub(crate) async fn close(&self) -> Result<()> {
        let mut w = self.write_half.lock().await;
        w.shutdown().await.map_err(TapsError::Io)
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}
