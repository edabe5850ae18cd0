//! Message framer pipeline (C7).
//!
//! A framer turns a byte stream into discrete messages and back. The core
//! drives at most one [`Framer::decode`] invocation at a time per connection
//! (§4.4); see [`crate::connection`] for the deframe driver.

use crate::message::MessageContext;
use crate::{Result, TapsError};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};

/// Default byte budget the deframe driver tolerates without forward progress
/// before giving up on a stream (§4.4, §7).
pub const DEFAULT_FAILURE_BUDGET: usize = 64 * 1024;

/// Outcome of one [`Framer::decode`] call against the front of the receive
/// buffer.
pub enum DecodeOutcome {
    /// A complete message was decoded. `consumed` bytes should be dropped
    /// from the front of the buffer.
    Message {
        context: MessageContext,
        data: Vec<u8>,
        consumed: usize,
        eom: bool,
    },
    /// Not enough bytes buffered yet; wait for more.
    NeedMoreData,
    /// The buffered bytes do not look like a valid message prefix. Treated
    /// like `NeedMoreData` until the byte budget is exhausted (§4.4).
    Failed,
}

/// The message framer contract.
#[async_trait]
pub trait Framer: Send + Sync {
    /// Encode one outbound message, given whether it is the last message of
    /// this write (`eom`).
    async fn encode(&self, message: &[u8], context: &MessageContext, eom: bool) -> Result<Vec<u8>>;

    /// Attempt to decode one message from the front of `buffer`.
    fn decode(&self, buffer: &[u8]) -> DecodeOutcome;

    /// Fired once, when the connection transitions to Established.
    async fn start(&self, _connection_name: &str) -> Result<()> {
        Ok(())
    }
}

/// A simple 4-byte big-endian length-prefix framer, used by default when a
/// connection carries no application framer.
#[derive(Debug, Default)]
pub struct LengthPrefixFramer;

impl LengthPrefixFramer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Framer for LengthPrefixFramer {
    async fn encode(&self, message: &[u8], _context: &MessageContext, _eom: bool) -> Result<Vec<u8>> {
        let len = message.len() as u32;
        let mut framed = Vec::with_capacity(4 + message.len());
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(message);
        Ok(framed)
    }

    fn decode(&self, buffer: &[u8]) -> DecodeOutcome {
        if buffer.len() < 4 {
            return DecodeOutcome::NeedMoreData;
        }
        let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        if buffer.len() < 4 + len {
            return DecodeOutcome::NeedMoreData;
        }
        DecodeOutcome::Message {
            context: MessageContext::new(),
            data: buffer[4..4 + len].to_vec(),
            consumed: 4 + len,
            eom: true,
        }
    }
}

/// Drives [`Framer::decode`] over an accumulating byte buffer, implementing
/// the byte-budget failure policy of §4.4/§7.
pub(crate) struct DeframeDriver {
    budget: usize,
    bytes_since_progress: usize,
}

impl DeframeDriver {
    pub(crate) fn new(budget: usize) -> Self {
        Self {
            budget,
            bytes_since_progress: 0,
        }
    }

    /// Run `framer.decode` until it can make no more progress, draining
    /// decoded messages from `buffer` into `out`. Returns `Err` once the
    /// byte budget is exceeded with no forward progress.
    pub(crate) fn drive(
        &mut self,
        framer: &dyn Framer,
        buffer: &mut BytesMut,
        out: &mut Vec<(MessageContext, Vec<u8>, bool)>,
    ) -> Result<()> {
        loop {
            match framer.decode(buffer) {
                DecodeOutcome::Message {
                    context,
                    data,
                    consumed,
                    eom,
                } => {
                    buffer.advance(consumed);
                    out.push((context, data, eom));
                    self.bytes_since_progress = 0;
                }
                DecodeOutcome::NeedMoreData => {
                    return Ok(());
                }
                DecodeOutcome::Failed => {
                    self.bytes_since_progress = buffer.len();
                    if self.bytes_since_progress >= self.budget {
                        return Err(TapsError::Receive(format!(
                            "framer made no progress after {} bytes",
                            self.bytes_since_progress
                        )));
                    }
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn length_prefix_round_trips() {
        let framer = LengthPrefixFramer::new();
        let ctx = MessageContext::new();
        let framed = framer.encode(b"hello", &ctx, true).await.unwrap();
        match framer.decode(&framed) {
            DecodeOutcome::Message { data, consumed, eom, .. } => {
                assert_eq!(data, b"hello");
                assert_eq!(consumed, framed.len());
                assert!(eom);
            }
            _ => panic!("expected a decoded message"),
        }
    }

    #[test]
    fn length_prefix_needs_more_data_on_partial_header() {
        let framer = LengthPrefixFramer::new();
        assert!(matches!(framer.decode(&[0, 0]), DecodeOutcome::NeedMoreData));
    }

    struct AlwaysFailFramer;

    #[async_trait]
    impl Framer for AlwaysFailFramer {
        async fn encode(&self, message: &[u8], _c: &MessageContext, _eom: bool) -> Result<Vec<u8>> {
            Ok(message.to_vec())
        }
        fn decode(&self, _buffer: &[u8]) -> DecodeOutcome {
            DecodeOutcome::Failed
        }
    }

    #[test]
    fn budget_exhaustion_produces_receive_error() {
        let framer = AlwaysFailFramer;
        let mut driver = DeframeDriver::new(8);
        let mut buffer = BytesMut::from(&[0u8; 16][..]);
        let mut out = Vec::new();
        let result = driver.drive(&framer, &mut buffer, &mut out);
        assert!(result.is_err());
    }

    #[test]
    fn budget_not_exceeded_keeps_waiting() {
        let framer = AlwaysFailFramer;
        let mut driver = DeframeDriver::new(64);
        let mut buffer = BytesMut::from(&[0u8; 4][..]);
        let mut out = Vec::new();
        let result = driver.drive(&framer, &mut buffer, &mut out);
        assert!(result.is_ok());
        assert!(out.is_empty());
    }
}
