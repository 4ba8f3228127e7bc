//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written with `to_vec_named`, so they travel as maps keyed by
//! field name rather than positional arrays. Peers can then add or reorder
//! fields without breaking each other.
//!
//! # Example
//!
//! ```
//! use linewire::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Reading {
//!     sensor: String,
//!     value: i64,
//! }
//!
//! let reading = Reading { sensor: "t1".to_string(), value: 21 };
//! let encoded = MsgPackCodec::encode(&reading).unwrap();
//! let decoded: Reading = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, reading);
//! ```

use crate::error::Result;

/// MessagePack codec for structured payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
