//! Transport module - TCP stream socket handling.
//!
//! Provides the single connect operation the channel needs. The resulting
//! stream is split into owned read/write halves by the session; dropping
//! both halves closes the socket.

mod tcp;

pub use tcp::connect;
