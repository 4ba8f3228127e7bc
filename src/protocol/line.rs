//! Newline-delimited text protocol.
//!
//! Each message is the bytes up to (not including) a `\n`. A trailing `\r`
//! is stripped by default so CRLF peers work unchanged.
//!
//! ```text
//! Hello!\n How are you?\r\n
//! └────┘   └──────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::{Decoded, Decoder};
use crate::error::{LinewireError, Result};
use crate::message::{Message, Violation};

/// Line delimiter.
pub const DELIMITER: u8 = b'\n';

/// Default maximum line length, excluding the delimiter (64 KB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// A single line of text.
///
/// Holds the raw bytes; [`TextLine::validate`] flags lines that are not
/// valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    line: Bytes,
}

impl TextLine {
    /// Create a line from text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            line: Bytes::from(text.into()),
        }
    }

    /// Create a line from raw bytes.
    pub fn from_bytes(line: impl Into<Bytes>) -> Self {
        Self { line: line.into() }
    }

    /// The line as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.line).ok()
    }

    /// The raw line bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.line
    }
}

impl Message for TextLine {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(self.line.len() + 1);
        dst.put_slice(&self.line);
        dst.put_u8(DELIMITER);
        Ok(())
    }

    fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        if let Err(e) = std::str::from_utf8(&self.line) {
            violations.push(Violation::new(
                "text",
                format!("not valid UTF-8 at byte {}", e.valid_up_to()),
            ));
        }
        if self.line.contains(&DELIMITER) {
            violations.push(Violation::new("text", "contains a line delimiter"));
        }
        violations
    }
}

/// Decoder for [`TextLine`] messages.
#[derive(Debug, Clone)]
pub struct LineDecoder {
    max_line_length: usize,
    strip_cr: bool,
}

impl LineDecoder {
    /// Create a decoder with default settings.
    ///
    /// Default max line length: 64KB, CR stripping on.
    pub fn new() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            strip_cr: true,
        }
    }

    /// Set the maximum line length.
    pub fn max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// Keep a trailing `\r` as part of the line.
    pub fn keep_cr(mut self) -> Self {
        self.strip_cr = false;
        self
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineDecoder {
    type Item = TextLine;

    fn decode(&self, buf: &[u8]) -> Result<Decoded<TextLine>> {
        let (lines, consumed, fault) = split_lines(buf, self.max_line_length, self.strip_cr);
        let messages = lines
            .into_iter()
            .map(|line| TextLine::from_bytes(Bytes::copy_from_slice(line)))
            .collect();

        Ok(Decoded {
            messages,
            consumed,
            fault,
        })
    }
}

/// Split `buf` into complete lines.
///
/// Returns the lines (delimiter removed) and the number of bytes they span,
/// delimiters included. An unterminated tail is left unconsumed. A line,
/// terminated or not, longer than `max_len` stops the split: the lines
/// before it are returned along with a `Protocol` fault.
pub(crate) fn split_lines(
    buf: &[u8],
    max_len: usize,
    strip_cr: bool,
) -> (Vec<&[u8]>, usize, Option<LinewireError>) {
    let mut lines = Vec::new();
    let mut consumed = 0;

    while let Some(pos) = buf[consumed..].iter().position(|&b| b == DELIMITER) {
        let mut line = &buf[consumed..consumed + pos];
        if strip_cr {
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
        }
        if line.len() > max_len {
            return (lines, consumed, Some(too_long(line.len(), max_len)));
        }
        lines.push(line);
        consumed += pos + 1;
    }

    let tail = buf.len() - consumed;
    if tail > max_len {
        return (lines, consumed, Some(too_long(tail, max_len)));
    }

    (lines, consumed, None)
}

fn too_long(len: usize, max: usize) -> LinewireError {
    LinewireError::Protocol(format!("Line length {} exceeds maximum {}", len, max))
}
