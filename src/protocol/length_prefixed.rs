//! Length-prefixed binary protocol.
//!
//! ```text
//! ┌──────────┬─────────────────┐
//! │ Length   │ Payload         │
//! │ 4 bytes  │ Length bytes    │
//! │ uint32 BE│                 │
//! └──────────┴─────────────────┘
//! ```
//!
//! Payloads are opaque; [`Packet::from_value`] and [`Packet::value`] carry
//! structured data with MsgPack.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Decoded, Decoder};
use crate::codec::MsgPackCodec;
use crate::error::{LinewireError, Result};
use crate::message::Message;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size (16 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// One length-prefixed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Bytes,
}

impl Packet {
    /// Create a packet from raw payload bytes.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Create a packet carrying a MsgPack-encoded value.
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::new(MsgPackCodec::encode(value)?))
    }

    /// Decode the payload as a MsgPack value.
    pub fn value<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.payload)
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

impl Message for Packet {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let len = u32::try_from(self.payload.len()).map_err(|_| {
            LinewireError::InvalidArgument(format!(
                "payload of {} bytes does not fit a 4-byte length",
                self.payload.len()
            ))
        })?;
        dst.reserve(HEADER_SIZE + self.payload.len());
        dst.put_u32(len);
        dst.put_slice(&self.payload);
        Ok(())
    }
}

/// Decoder for [`Packet`] messages.
#[derive(Debug, Clone)]
pub struct LengthPrefixedDecoder {
    max_payload_size: u32,
}

impl LengthPrefixedDecoder {
    /// Create a decoder with the default max payload (16MB).
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a decoder with a custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self { max_payload_size }
    }
}

impl Default for LengthPrefixedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LengthPrefixedDecoder {
    type Item = Packet;

    fn decode(&self, buf: &[u8]) -> Result<Decoded<Packet>> {
        if buf.len() < HEADER_SIZE {
            return Ok(Decoded::none());
        }

        let mut messages = Vec::new();
        let mut consumed = 0;

        loop {
            let rest = &buf[consumed..];
            if rest.len() < HEADER_SIZE {
                break;
            }

            let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
            if len > self.max_payload_size {
                return Ok(Decoded {
                    messages,
                    consumed,
                    fault: Some(LinewireError::Protocol(format!(
                        "Payload size {} exceeds maximum {}",
                        len, self.max_payload_size
                    ))),
                });
            }

            let end = HEADER_SIZE + len as usize;
            if rest.len() < end {
                break;
            }

            messages.push(Packet::new(Bytes::copy_from_slice(&rest[HEADER_SIZE..end])));
            consumed += end;
        }

        Ok(Decoded::complete(messages, consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;

    fn wire(payloads: &[&[u8]]) -> Vec<u8> {
        let mut dst = BytesMut::new();
        for p in payloads {
            Packet::new(p.to_vec()).encode(&mut dst).unwrap();
        }
        dst.to_vec()
    }

    #[test]
    fn test_header_big_endian() {
        let bytes = wire(&[b"hello"]);
        assert_eq!(&bytes[..HEADER_SIZE], &[0, 0, 0, 5]);
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_multiple_packets() {
        let bytes = wire(&[b"first", b"", b"third"]);
        let decoded = LengthPrefixedDecoder::new().decode(&bytes).unwrap();

        assert_eq!(decoded.messages.len(), 3);
        assert_eq!(decoded.messages[0].payload(), b"first");
        assert!(decoded.messages[1].payload().is_empty());
        assert_eq!(decoded.messages[2].payload(), b"third");
        assert_eq!(decoded.consumed, bytes.len());
    }

    #[test]
    fn test_fragmented_header_and_payload() {
        let bytes = wire(&[b"this payload arrives in pieces"]);
        let mut buffer = FrameBuffer::new(LengthPrefixedDecoder::new());

        assert!(buffer.push(&bytes[..2]).unwrap().messages.is_empty());
        assert!(buffer.push(&bytes[2..10]).unwrap().messages.is_empty());
        let framed = buffer.push(&bytes[10..]).unwrap();

        assert_eq!(framed.messages.len(), 1);
        assert_eq!(framed.messages[0].payload(), b"this payload arrives in pieces");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_max_payload_validation() {
        let decoder = LengthPrefixedDecoder::with_max_payload(100);
        let fault = decoder.decode(&1000u32.to_be_bytes()).unwrap().fault;

        assert!(fault.unwrap().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_packets_before_oversized_header_survive() {
        let mut bytes = wire(&[b"small"]);
        bytes.extend_from_slice(&1000u32.to_be_bytes());
        bytes.extend_from_slice(b"junk");

        let mut buffer = FrameBuffer::new(LengthPrefixedDecoder::with_max_payload(100));
        let framed = buffer.push(&bytes).unwrap();

        assert_eq!(framed.messages.len(), 1);
        assert_eq!(framed.messages[0].payload(), b"small");
        assert_eq!(framed.consumed, HEADER_SIZE + 5);
        assert_eq!(framed.discarded, HEADER_SIZE + 4);
        assert!(framed.fault.is_some());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_accounting_for_every_split() {
        let mut stream = wire(&[b"alpha", b"", b"gamma-delta"]);
        let tail = [0u8, 0, 0, 5, b'e', b'p'];
        stream.extend_from_slice(&tail);

        for step in 1..=stream.len() {
            let mut buffer = FrameBuffer::new(LengthPrefixedDecoder::new());
            let mut consumed = 0;
            let mut payloads = Vec::new();

            for chunk in stream.chunks(step) {
                let framed = buffer.push(chunk).unwrap();
                assert!(framed.fault.is_none());
                consumed += framed.consumed;
                payloads.extend(framed.messages.iter().map(|m| m.payload().to_vec()));
            }

            assert_eq!(
                payloads,
                vec![b"alpha".to_vec(), Vec::new(), b"gamma-delta".to_vec()],
                "chunk size {}",
                step
            );
            assert_eq!(consumed + buffer.len(), stream.len());
            assert_eq!(buffer.backlog(), &tail[..]);
        }
    }

    #[test]
    fn test_msgpack_value() {
        #[derive(Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Reading {
            sensor: String,
            value: f64,
        }

        let reading = Reading {
            sensor: "t1".to_string(),
            value: 21.5,
        };
        let packet = Packet::from_value(&reading).unwrap();
        let back: Reading = packet.value().unwrap();
        assert_eq!(back, reading);
    }
}
