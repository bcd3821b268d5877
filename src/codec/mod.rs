//! Codec module - serialization/deserialization for payloads.
//!
//! - [`JsonCodec`] - UTF-8 JSON using `serde_json`
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so call sites pick the codec at compile time.

mod json;

pub use json::JsonCodec;
