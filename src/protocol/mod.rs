//! Protocol module - the framing engine and ready-made protocols.
//!
//! This module implements message framing for the data path:
//! - [`Decoder`] capability trait supplied by each protocol
//! - [`FrameBuffer`] for accumulating partial reads into whole messages
//! - text lines, JSON lines and length-prefixed packets

mod frame_buffer;
pub mod json_line;
pub mod length_prefixed;
pub mod line;

pub use frame_buffer::{FrameBuffer, Framed, DEFAULT_BACKLOG_CAPACITY};

use crate::error::{LinewireError, Result};
use crate::message::Message;

/// Output of a single decode step.
#[derive(Debug)]
pub struct Decoded<M> {
    /// Complete messages, in the order they appear in the buffer.
    pub messages: Vec<M>,
    /// Number of leading bytes fully consumed to produce them.
    pub consumed: usize,
    /// Set when the bytes after `consumed` can never form a valid message.
    pub fault: Option<LinewireError>,
}

impl<M> Decoded<M> {
    /// Nothing complete yet.
    pub fn none() -> Self {
        Self::complete(Vec::new(), 0)
    }

    /// Messages decoded without trouble.
    pub fn complete(messages: Vec<M>, consumed: usize) -> Self {
        Self {
            messages,
            consumed,
            fault: None,
        }
    }
}

/// Protocol-specific decode step.
///
/// Given the whole working buffer, return every complete message found and
/// the count of leading bytes they occupy. Must be deterministic and must
/// never consume bytes of an incomplete trailing message.
///
/// When the stream breaks a protocol rule (an oversized frame, say), return
/// the messages completed before the offending bytes together with a
/// `fault`. Returning `Err` instead discards those messages.
pub trait Decoder: Send + Sync + 'static {
    /// Message type produced by this decoder.
    type Item: Message;

    /// Decode as many complete messages as `buf` holds.
    fn decode(&self, buf: &[u8]) -> Result<Decoded<Self::Item>>;
}
