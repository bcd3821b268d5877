//! JSON codec using `serde_json`.
//!
//! Payloads on the wire are UTF-8 JSON documents, one per frame.
//!
//! # Example
//!
//! ```
//! use wirelink::codec::JsonCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Request {
//!     id: u32,
//! }
//!
//! let encoded = JsonCodec::encode(&Request { id: 1 }).unwrap();
//! assert_eq!(&encoded[..], br#"{"id":1}"#);
//! let decoded: Request = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, Request { id: 1 });
//! ```

use bytes::Bytes;
use serde_json::Value;

use crate::error::Result;

/// JSON codec for structured payloads.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    /// Decode JSON bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode JSON bytes to a generic value.
    #[inline]
    pub fn decode_value(bytes: &[u8]) -> Result<Value> {
        Self::decode(bytes)
    }
}
