//! Wire format encoding and decoding.
//!
//! Every message travels in one length-prefixed frame with a 9-byte header:
//! ```text
//! ┌───────┬────────────────┬──────────┐
//! │ Flags │ Correlation ID │ Length   │
//! │ 1 byte│ 4 bytes        │ 4 bytes  │
//! │       │ uint32 BE      │ uint32 BE│
//! └───────┴────────────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{ChannelError, Result};

/// Header size in bytes (fixed, exactly 9).
pub const HEADER_SIZE: usize = 9;

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Correlation id carried by frames that answer nothing in particular.
pub const UNCORRELATED: u32 = 0;

/// Flag constants for the protocol.
pub mod flags {
    /// Liveness probe; carries no payload and is never delivered upward.
    pub const HEARTBEAT: u8 = 0b0000_0001;

    /// Reserved bits mask (bits 1-7).
    pub const RESERVED_MASK: u8 = 0b1111_1110;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Correlation identifier (0 = uncorrelated).
    pub correlation_id: u32,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(flags: u8, correlation_id: u32, payload_length: u32) -> Self {
        Self {
            flags,
            correlation_id,
            payload_length,
        }
    }

    /// Header of a data frame.
    pub fn data(correlation_id: u32, payload_length: u32) -> Self {
        Self::new(0, correlation_id, payload_length)
    }

    /// Header of a heartbeat frame.
    pub fn heartbeat() -> Self {
        Self::new(flags::HEARTBEAT, UNCORRELATED, 0)
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use wirelink::protocol::Header;
    ///
    /// let header = Header::data(42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 9);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (9 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.flags;
        buf[1..5].copy_from_slice(&self.correlation_id.to_be_bytes());
        buf[5..9].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use wirelink::protocol::Header;
    ///
    /// let bytes = [0, 0, 0, 0, 42, 0, 0, 0, 100];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.correlation_id, 42);
    /// assert_eq!(header.payload_length, 100);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            flags: buf[0],
            correlation_id: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            payload_length: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Payload length doesn't exceed max
    /// - Reserved flag bits are 0
    /// - Heartbeats carry no payload
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(ChannelError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(ChannelError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        if self.is_heartbeat() && self.payload_length != 0 {
            return Err(ChannelError::Protocol(
                "Heartbeat frames must not carry a payload".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if this is a heartbeat.
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        flags::has_flag(self.flags, flags::HEARTBEAT)
    }

    /// Check if this frame carries a correlation id.
    #[inline]
    pub fn is_correlated(&self) -> bool {
        self.correlation_id != UNCORRELATED
    }
}
