//! Channel configuration.
//!
//! [`ChannelConfig`] holds every tunable of the channel. It can be built in
//! code (usually through [`ChannelBuilder`](crate::ChannelBuilder)) or loaded
//! from JSON, where durations are written in milliseconds:
//!
//! ```
//! use std::time::Duration;
//! use wirelink::ChannelConfig;
//!
//! let config = ChannelConfig::from_json_str(
//!     r#"{ "host": "10.0.0.5", "port": 9000, "heartbeat_interval_ms": 0 }"#,
//! ).unwrap();
//!
//! assert_eq!(config.port, 9000);
//! assert!(config.heartbeat_interval.is_zero());
//! assert_eq!(config.reconnect_delay, Duration::from_secs(2));
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MULTIPLIER};
use crate::error::{ChannelError, Result};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;

/// Default host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default timeout for the connect syscall.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default receive buffer size per read.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Default deadline for `call`.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause of the send worker when it dequeues while not connected.
pub const DEFAULT_SEND_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Default bound on joining each worker during disconnect.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration of a [`Channel`](crate::Channel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Initial backoff delay.
    #[serde(rename = "reconnect_delay_ms", with = "duration_ms")]
    pub reconnect_delay: Duration,
    /// Backoff cap.
    #[serde(rename = "max_reconnect_delay_ms", with = "duration_ms")]
    pub max_reconnect_delay: Duration,
    /// Backoff growth factor per failed attempt.
    pub backoff_multiplier: f64,
    /// Interval between heartbeats; zero disables the heartbeat worker.
    #[serde(rename = "heartbeat_interval_ms", with = "duration_ms")]
    pub heartbeat_interval: Duration,
    /// Timeout of the connect syscall only.
    #[serde(rename = "connection_timeout_ms", with = "duration_ms")]
    pub connection_timeout: Duration,
    /// Maximum bytes per socket read.
    pub buffer_size: usize,
    /// Reconnect automatically after a transport failure.
    pub auto_reconnect: bool,
    /// Deadline used by `call_default`.
    #[serde(rename = "call_timeout_ms", with = "duration_ms")]
    pub call_timeout: Duration,
    /// Pause of the send worker when it dequeues while not connected.
    #[serde(rename = "send_retry_interval_ms", with = "duration_ms")]
    pub send_retry_interval: Duration,
    /// Bound on joining each worker during disconnect.
    #[serde(rename = "join_timeout_ms", with = "duration_ms")]
    pub join_timeout: Duration,
    /// Largest payload accepted in either direction. Inbound frames above it
    /// mark the stream corrupt; outbound ones are refused before queueing.
    pub max_payload_size: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reconnect_delay: DEFAULT_INITIAL_DELAY,
            max_reconnect_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_MULTIPLIER,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            auto_reconnect: true,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            send_retry_interval: DEFAULT_SEND_RETRY_INTERVAL,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl ChannelConfig {
    /// Default configuration pointed at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// `host:port` string used for connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the configuration for values the channel cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ChannelError::Config("host must not be empty".to_string()));
        }
        if self.buffer_size == 0 {
            return Err(ChannelError::Config("buffer_size must be positive".to_string()));
        }
        if self.reconnect_delay.is_zero() {
            return Err(ChannelError::Config(
                "reconnect_delay must be positive".to_string(),
            ));
        }
        if self.max_reconnect_delay < self.reconnect_delay {
            return Err(ChannelError::Config(format!(
                "max_reconnect_delay {:?} is below reconnect_delay {:?}",
                self.max_reconnect_delay, self.reconnect_delay
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ChannelError::Config(format!(
                "backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Serde adapter storing a `Duration` as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
