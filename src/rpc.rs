//! Request/response and notification API on top of [`Channel`].
//!
//! Calls are single-flight: the call mutex is held from enqueueing the
//! request until the response (or the deadline), so the next response on
//! the wire belongs to the caller holding it even when the peer does not
//! echo correlation ids.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::time::Instant;

use crate::channel::Channel;
use crate::codec::JsonCodec;
use crate::demux::Message;
use crate::error::{ChannelError, Result};
use crate::observer::SubscriptionId;
use crate::writer::OutboundFrame;

impl Channel {
    /// Send `request` and wait for its response until `timeout` elapses.
    ///
    /// A timeout only abandons this wait; the connection state is untouched.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Timeout`] when no response arrived in time
    /// - [`ChannelError::NotRunning`] when the channel is not running
    /// - [`ChannelError::Protocol`] when `request` exceeds `max_payload_size`
    pub async fn call(&self, request: impl Into<Bytes>, timeout: Duration) -> Result<Message> {
        let shared = &self.shared;
        let deadline = Instant::now() + timeout;
        let request = request.into();
        shared.check_payload(&request)?;

        let mut slot = tokio::time::timeout_at(deadline, shared.demux.lock_calls())
            .await
            .map_err(|_| ChannelError::Timeout(timeout))?;

        if !shared.is_running() {
            return Err(ChannelError::NotRunning);
        }

        slot.discard_stale();
        let id = shared.next_correlation_id();
        shared.queue.push_back(OutboundFrame::data(id, request));
        tracing::debug!(correlation_id = id, "Request queued");

        match slot.wait(id, deadline).await {
            Some(message) => Ok(message),
            None => {
                tracing::warn!(
                    correlation_id = id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(ChannelError::Timeout(timeout))
            }
        }
    }

    /// Serialize `request` as JSON and [`call`](Channel::call) with it.
    pub async fn call_json<T>(&self, request: &T, timeout: Duration) -> Result<Message>
    where
        T: Serialize + ?Sized,
    {
        let payload = JsonCodec::encode(request)?;
        self.call(payload, timeout).await
    }

    /// [`call`](Channel::call) with the configured `call_timeout`.
    pub async fn call_default(&self, request: impl Into<Bytes>) -> Result<Message> {
        let timeout = self.shared.config.call_timeout;
        self.call(request, timeout).await
    }

    /// Take the next queued notification.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` returns immediately.
    pub async fn next_notification(&self, timeout: Option<Duration>) -> Option<Message> {
        self.shared.demux.next_notification(timeout).await
    }

    /// Invoke `callback` synchronously for every notification, before it is
    /// queued for [`next_notification`](Channel::next_notification).
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let observers = &self.shared.observers;
        observers.add(&observers.notification, Arc::new(callback))
    }
}
