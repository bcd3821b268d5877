//! Error types for wirelink.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connect syscall did not complete within `connection_timeout`.
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Peer closed the connection (zero-length read).
    #[error("Connection closed")]
    ConnectionClosed,

    /// Framing violation on the inbound stream (bad header, oversized payload).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No response arrived before the caller's deadline.
    #[error("Timed out waiting for response after {0:?}")]
    Timeout(Duration),

    /// Data was offered to a channel that is not running.
    #[error("Channel is not running")]
    NotRunning,

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ChannelError {
    /// Whether this error is a transport-level failure that feeds the
    /// disconnect/reconnect pipeline.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChannelError::Io(_)
                | ChannelError::ConnectTimeout(_)
                | ChannelError::ConnectionClosed
                | ChannelError::Protocol(_)
        )
    }
}

/// Result type alias using ChannelError.
pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        let io = ChannelError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"));
        assert!(io.is_transport());
        assert!(ChannelError::ConnectionClosed.is_transport());
        assert!(ChannelError::Protocol("bad".into()).is_transport());
        assert!(ChannelError::ConnectTimeout(Duration::from_secs(1)).is_transport());

        assert!(!ChannelError::Timeout(Duration::from_millis(100)).is_transport());
        assert!(!ChannelError::NotRunning.is_transport());
    }

    #[test]
    fn test_display_messages() {
        let err = ChannelError::Timeout(Duration::from_millis(100));
        assert!(err.to_string().contains("Timed out"));
        assert_eq!(ChannelError::ConnectionClosed.to_string(), "Connection closed");
    }
}
