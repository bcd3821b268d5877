//! Demultiplexer: routes inbound payloads to the waiting caller or to the
//! notification stream.
//!
//! A decoded payload is a *notification* when it is a JSON object whose
//! `"type"` member is truthy (not `null`, `false`, `0`, `""`, `[]` or `{}`);
//! anything else is a *response*. Responses go to the single response slot
//! owned by the call mutex, notifications to their subscribers and then to
//! the pull queue. Payloads that are not valid JSON are logged and dropped.
//!
//! Both queues hold at most [`PENDING_CAPACITY`] messages. When one is full
//! the newest message is dropped with a warning; subscribers still see every
//! notification.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::time::Instant;

use crate::codec::JsonCodec;
use crate::error::Result;
use crate::observer::ObserverList;
use crate::protocol::{Frame, UNCORRELATED};

/// Unclaimed responses or unpulled notifications kept before dropping.
pub(crate) const PENDING_CAPACITY: usize = 1024;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    correlation_id: u32,
    body: Value,
}

impl Message {
    pub fn new(correlation_id: u32, body: Value) -> Self {
        Self {
            correlation_id,
            body,
        }
    }

    /// Correlation id of the frame the message arrived in (0 = uncorrelated).
    #[inline]
    pub fn correlation_id(&self) -> u32 {
        self.correlation_id
    }

    #[inline]
    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }

    /// Member `key` of an object body.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Whether the message is a server-pushed notification.
    pub fn is_notification(&self) -> bool {
        self.body.get("type").is_some_and(truthy)
    }

    /// The `"type"` member of a notification, when it is a string.
    pub fn notification_type(&self) -> Option<&str> {
        if !self.is_notification() {
            return None;
        }
        self.body.get("type").and_then(Value::as_str)
    }

    /// Deserialize the body into a typed value.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(members) => !members.is_empty(),
    }
}

/// Receiving end of the response slot, held by the caller owning the call
/// mutex.
pub(crate) struct ResponseSlot {
    rx: mpsc::Receiver<Message>,
}

impl ResponseSlot {
    /// Drop responses that arrived while nobody was waiting.
    pub(crate) fn discard_stale(&mut self) -> usize {
        let mut discarded = 0;
        while let Ok(message) = self.rx.try_recv() {
            tracing::debug!(
                correlation_id = message.correlation_id(),
                "Discarding unclaimed response"
            );
            discarded += 1;
        }
        discarded
    }

    /// Wait for the response to call `id` until `deadline`.
    ///
    /// Responses carrying a different non-zero id belong to an earlier,
    /// abandoned call and are skipped. Returns `None` on timeout.
    pub(crate) async fn wait(&mut self, id: u32, deadline: Instant) -> Option<Message> {
        loop {
            let message = tokio::time::timeout_at(deadline, self.rx.recv())
                .await
                .ok()??;

            let correlation_id = message.correlation_id();
            if correlation_id == id || correlation_id == UNCORRELATED {
                return Some(message);
            }
            tracing::debug!(
                expected = id,
                correlation_id,
                "Discarding stale response"
            );
        }
    }
}

pub(crate) struct Demultiplexer {
    responses_tx: mpsc::Sender<Message>,
    responses: Mutex<ResponseSlot>,
    notifications_tx: mpsc::Sender<Message>,
    notifications: Mutex<mpsc::Receiver<Message>>,
}

impl Demultiplexer {
    pub(crate) fn new() -> Self {
        let (responses_tx, rx) = mpsc::channel(PENDING_CAPACITY);
        let (notifications_tx, notifications_rx) = mpsc::channel(PENDING_CAPACITY);
        Self {
            responses_tx,
            responses: Mutex::new(ResponseSlot { rx }),
            notifications_tx,
            notifications: Mutex::new(notifications_rx),
        }
    }

    /// Classify and deliver one inbound frame.
    pub(crate) fn route(&self, frame: &Frame, subscribers: &ObserverList<Message>) {
        let body = match JsonCodec::decode_value(frame.payload()) {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    len = frame.payload_len(),
                    "Discarding undecodable payload"
                );
                return;
            }
        };

        let message = Message::new(frame.correlation_id(), body);
        if message.is_notification() {
            tracing::trace!(kind = ?message.notification_type(), "Notification received");
            subscribers.emit(&message);
            if let Err(TrySendError::Full(dropped)) = self.notifications_tx.try_send(message) {
                tracing::warn!(
                    kind = ?dropped.notification_type(),
                    capacity = PENDING_CAPACITY,
                    "Notification queue full, dropping notification"
                );
            }
        } else {
            tracing::trace!(correlation_id = message.correlation_id(), "Response received");
            if let Err(TrySendError::Full(dropped)) = self.responses_tx.try_send(message) {
                tracing::warn!(
                    correlation_id = dropped.correlation_id(),
                    capacity = PENDING_CAPACITY,
                    "Response slot full, dropping response"
                );
            }
        }
    }

    /// Acquire the call mutex; the guard owns the response slot.
    pub(crate) async fn lock_calls(&self) -> MutexGuard<'_, ResponseSlot> {
        self.responses.lock().await
    }

    /// Next queued notification.
    ///
    /// `None` waits indefinitely, a zero timeout only polls.
    pub(crate) async fn next_notification(&self, timeout: Option<Duration>) -> Option<Message> {
        match timeout {
            None => self.notifications.lock().await.recv().await,
            Some(timeout) if timeout.is_zero() => {
                let mut rx = self.notifications.try_lock().ok()?;
                rx.try_recv().ok()
            }
            Some(timeout) => tokio::time::timeout(timeout, async {
                self.notifications.lock().await.recv().await
            })
            .await
            .ok()
            .flatten(),
        }
    }
}
