//! # wirelink
//!
//! Resilient framed messaging channel over TCP.
//!
//! A [`Channel`] keeps one connection to a server alive: it reconnects with
//! capped exponential backoff, probes the peer with heartbeats, and splits
//! inbound traffic into responses for the single in-flight
//! [`call`](Channel::call) and server-pushed notifications.
//!
//! ## Architecture
//!
//! - **Wire protocol**: every JSON document travels in one frame with a
//!   9-byte header (flags, correlation id, payload length)
//! - **Session**: per connection, a receive, a send and a heartbeat worker
//! - **Outbound queue**: shared across reconnects, so accepted data is sent
//!   in order once the connection is back
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use serde_json::json;
//! use wirelink::Channel;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wirelink::ChannelError> {
//!     let channel = Channel::builder().host("127.0.0.1").port(9000).build()?;
//!
//!     channel.subscribe(|note| println!("notification: {}", note.body()));
//!     channel.connect().await;
//!
//!     let reply = channel
//!         .call_json(&json!({"action": "login", "user": "ala"}), Duration::from_secs(5))
//!         .await?;
//!     println!("{}", reply.body());
//!
//!     channel.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod backoff;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod state;
pub mod transport;

mod channel;
mod demux;
mod heartbeat;
mod observer;
mod queue;
mod reader;
mod rpc;
mod session;
mod writer;

pub use backoff::Backoff;
pub use channel::{Channel, ChannelBuilder};
pub use config::ChannelConfig;
pub use demux::Message;
pub use error::{ChannelError, Result};
pub use observer::SubscriptionId;
pub use state::ConnectionState;

/// Lock a std mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
