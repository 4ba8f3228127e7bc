//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for the backlog. Each push appends the chunk to
//! the backlog, hands the whole working buffer to the protocol [`Decoder`],
//! validates every decoded message and drops only the consumed prefix.
//! Whatever the decoder could not complete stays buffered for the next push.
//!
//! # Example
//!
//! ```
//! use linewire::protocol::FrameBuffer;
//! use linewire::protocol::line::LineDecoder;
//!
//! let mut buffer = FrameBuffer::new(LineDecoder::new());
//!
//! let framed = buffer.push(b"Hel").unwrap();
//! assert!(framed.messages.is_empty());
//! assert_eq!(buffer.len(), 3);
//!
//! let framed = buffer.push(b"lo!\n").unwrap();
//! assert_eq!(framed.messages.len(), 1);
//! assert_eq!(framed.consumed, 7);
//! assert!(buffer.is_empty());
//! ```

use bytes::{Buf, BytesMut};

use super::{Decoded, Decoder};
use crate::error::{LinewireError, Result};
use crate::message::{Envelope, Message};

/// Default initial backlog capacity (4 KB).
pub const DEFAULT_BACKLOG_CAPACITY: usize = 4 * 1024;

/// Result of a single push.
#[derive(Debug)]
pub struct Framed<M> {
    /// Complete messages, in stream order, with validation recorded.
    pub messages: Vec<Envelope<M>>,
    /// Leading bytes of the working buffer consumed by this push.
    pub consumed: usize,
    /// Backlog bytes thrown away because of `fault`.
    pub discarded: usize,
    /// Protocol error hit after the returned messages, if any.
    pub fault: Option<LinewireError>,
}

/// Buffer for accumulating incoming bytes and extracting complete messages.
///
/// One instance per connection. The backlog always holds exactly the suffix
/// of the byte stream that has not been resolved into a message yet.
pub struct FrameBuffer<D: Decoder> {
    /// Bytes received but not yet decoded.
    buffer: BytesMut,
    /// Protocol-specific decode step.
    decoder: D,
}

impl<D: Decoder> FrameBuffer<D> {
    /// Create a new frame buffer with default capacity.
    pub fn new(decoder: D) -> Self {
        Self::with_capacity(decoder, DEFAULT_BACKLOG_CAPACITY)
    }

    /// Create a new frame buffer with a custom initial capacity.
    pub fn with_capacity(decoder: D, capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            decoder,
        }
    }

    /// Push a chunk into the buffer and extract all complete messages.
    ///
    /// Messages that fail validation are still returned, with their
    /// violations attached.
    ///
    /// A protocol error does not fail the push. Messages completed before
    /// the offending bytes are returned, the rest of the backlog is dropped
    /// (the stream can no longer be trusted) and the error is reported in
    /// [`Framed::fault`]. A decoder that claims more bytes than were
    /// buffered is treated the same way, with no messages kept.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `chunk` is empty.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Framed<D::Item>> {
        if chunk.is_empty() {
            return Err(LinewireError::InvalidArgument(
                "chunk must not be empty".to_string(),
            ));
        }

        self.buffer.extend_from_slice(chunk);

        let decoded = match self.decoder.decode(&self.buffer) {
            Ok(decoded) if decoded.consumed > self.buffer.len() => Decoded {
                messages: Vec::new(),
                consumed: 0,
                fault: Some(LinewireError::Protocol(format!(
                    "decoder consumed {} bytes but only {} were buffered",
                    decoded.consumed,
                    self.buffer.len()
                ))),
            },
            Ok(decoded) => decoded,
            Err(e) => Decoded {
                messages: Vec::new(),
                consumed: 0,
                fault: Some(e),
            },
        };

        self.buffer.advance(decoded.consumed);

        let discarded = match decoded.fault {
            Some(_) => {
                let dropped = self.buffer.len();
                self.buffer.clear();
                dropped
            }
            None => 0,
        };

        let messages = decoded
            .messages
            .into_iter()
            .map(|message| {
                let violations = message.validate();
                let mut envelope = Envelope::new(message);
                envelope.set_violations(violations);
                envelope
            })
            .collect();

        Ok(Framed {
            messages,
            consumed: decoded.consumed,
            discarded,
            fault: decoded.fault,
        })
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The bytes currently waiting for completion.
    pub fn backlog(&self) -> &[u8] {
        &self.buffer
    }

    /// Discard the backlog.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// The protocol decoder in use.
    pub fn decoder(&self) -> &D {
        &self.decoder
    }
}

impl<D: Decoder + Default> Default for FrameBuffer<D> {
    fn default() -> Self {
        Self::new(D::default())
    }
}
