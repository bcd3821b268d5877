//! Connection lifecycle state.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of a [`Channel`](crate::Channel).
///
/// Exactly one value holds at any instant and every change is published to
/// the connection observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport; terminal until `connect()` or `reconnect()`.
    Disconnected,
    /// An explicit `connect()` is in progress.
    Connecting,
    /// Transport established and workers running.
    Connected,
    /// Transport lost; the reconnect worker is retrying with backoff.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
