//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use wirelink::protocol::{Frame, Header};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Header::data(42, 5), Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.correlation_id(), 42);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
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

    /// Get the correlation ID.
    #[inline]
    pub fn correlation_id(&self) -> u32 {
        self.header.correlation_id
    }

    /// Check if this is a heartbeat.
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.header.is_heartbeat()
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes a data header for `payload` and appends the payload. Useful for
/// peers (servers, tests) that write frames without the send worker.
///
/// # Example
///
/// ```
/// use wirelink::protocol::build_frame;
///
/// let bytes = build_frame(7, b"{}");
/// assert_eq!(bytes.len(), 9 + 2);
/// ```
pub fn build_frame(correlation_id: u32, payload: &[u8]) -> Vec<u8> {
    let header = Header::data(correlation_id, payload.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
