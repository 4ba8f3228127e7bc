//! Codec module - structured payload encoding.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (struct-as-map), used by
//!   [`Packet`](crate::protocol::length_prefixed::Packet) for typed payloads
//!
//! # Example
//!
//! ```
//! use linewire::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
