//! Newline-delimited JSON protocol.
//!
//! Each line carries one JSON document. A line that does not parse into `T`
//! is still delivered: the raw bytes are kept and the parse error becomes a
//! `json` violation, so the application decides what to do with it.
//!
//! # Example
//!
//! ```
//! use linewire::protocol::json_line::JsonLineDecoder;
//! use linewire::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new(JsonLineDecoder::<u32>::new());
//! let framed = buffer.push(b"42\nnope\n").unwrap();
//!
//! assert_eq!(framed.messages[0].value(), Some(&42));
//! assert!(!framed.messages[1].is_valid());
//! ```

use std::fmt;
use std::marker::PhantomData;

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::line::{split_lines, DEFAULT_MAX_LINE_LENGTH, DELIMITER};
use super::{Decoded, Decoder};
use crate::error::Result;
use crate::message::{Message, Violation};

/// One JSON document on its own line.
#[derive(Debug, Clone)]
pub struct JsonLine<T> {
    raw: Bytes,
    value: Option<T>,
    parse_error: Option<String>,
}

impl<T: Serialize> JsonLine<T> {
    /// Create an outbound line from a value.
    pub fn new(value: T) -> Self {
        Self {
            raw: Bytes::new(),
            value: Some(value),
            parse_error: None,
        }
    }
}

impl<T> JsonLine<T> {
    /// The parsed value, if the line was valid JSON for `T`.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Take the parsed value.
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// The raw line as received (empty for outbound lines).
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

impl<T> Message for JsonLine<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        match &self.value {
            Some(value) => {
                let json = serde_json::to_vec(value)?;
                dst.reserve(json.len() + 1);
                dst.put_slice(&json);
            }
            None => dst.put_slice(&self.raw),
        }
        dst.put_u8(DELIMITER);
        Ok(())
    }

    fn validate(&self) -> Vec<Violation> {
        match &self.parse_error {
            Some(reason) => vec![Violation::new("json", reason.clone())],
            None => Vec::new(),
        }
    }
}

/// Decoder for [`JsonLine`] messages.
pub struct JsonLineDecoder<T> {
    max_line_length: usize,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> JsonLineDecoder<T> {
    /// Create a decoder with the default max line length (64KB).
    pub fn new() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            _phantom: PhantomData,
        }
    }

    /// Set the maximum line length.
    pub fn max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }
}

impl<T> Default for JsonLineDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonLineDecoder<T> {
    fn clone(&self) -> Self {
        Self {
            max_line_length: self.max_line_length,
            _phantom: PhantomData,
        }
    }
}

impl<T> fmt::Debug for JsonLineDecoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLineDecoder")
            .field("max_line_length", &self.max_line_length)
            .finish()
    }
}

impl<T> Decoder for JsonLineDecoder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = JsonLine<T>;

    fn decode(&self, buf: &[u8]) -> Result<Decoded<JsonLine<T>>> {
        let (lines, consumed, fault) = split_lines(buf, self.max_line_length, true);
        let messages = lines
            .into_iter()
            .map(|line| {
                let (value, parse_error) = match serde_json::from_slice::<T>(line) {
                    Ok(v) => (Some(v), None),
                    Err(e) => (None, Some(e.to_string())),
                };
                JsonLine {
                    raw: Bytes::copy_from_slice(line),
                    value,
                    parse_error,
                }
            })
            .collect();

        Ok(Decoded {
            messages,
            consumed,
            fault,
        })
    }
}
