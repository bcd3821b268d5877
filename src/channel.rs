//! Channel builder and connection manager.
//!
//! The [`ChannelBuilder`] provides a fluent API over [`ChannelConfig`]. The
//! [`Channel`] owns the connection lifecycle:
//! 1. `connect()` opens the TCP stream and starts a session
//! 2. Session workers read, write and probe the connection
//! 3. A transport failure retires the session and, with auto-reconnect,
//!    starts the reconnect worker
//! 4. The reconnect worker retries with capped exponential backoff until a
//!    new session is up or the channel is disconnected
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use wirelink::Channel;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let channel = Channel::builder()
//!         .host("127.0.0.1")
//!         .port(9000)
//!         .heartbeat_interval(Duration::from_secs(5))
//!         .build()?;
//!
//!     channel.on_connection_change(|state| println!("state: {}", state));
//!
//!     if channel.connect().await {
//!         let reply = channel.call(r#"{"action":"ping"}"#, Duration::from_secs(2)).await?;
//!         println!("{}", reply.body());
//!     }
//!
//!     channel.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;

use crate::backoff::Backoff;
use crate::config::ChannelConfig;
use crate::demux::Demultiplexer;
use crate::error::{ChannelError, Result};
use crate::lock;
use crate::observer::{Observers, SubscriptionId};
use crate::protocol::{Frame, UNCORRELATED};
use crate::queue::OutboundQueue;
use crate::session::{Link, Session};
use crate::state::ConnectionState;
use crate::transport;
use crate::writer::{OutboundFrame, UrgentFrame};

/// Builder for configuring and creating a [`Channel`].
///
/// Every setter overrides one field of the underlying [`ChannelConfig`];
/// `build()` validates the result.
#[derive(Debug, Clone, Default)]
pub struct ChannelBuilder {
    config: ChannelConfig,
}

impl ChannelBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Server host name or address.
    ///
    /// Default: `127.0.0.1`
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Server port.
    ///
    /// Default: 8080
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Initial delay between reconnection attempts.
    ///
    /// Default: 2 seconds
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Upper bound on the reconnection delay.
    ///
    /// Default: 30 seconds
    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.max_reconnect_delay = delay;
        self
    }

    /// Growth factor of the delay per failed attempt.
    ///
    /// Default: 1.5
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    /// Interval between heartbeats; `Duration::ZERO` disables them.
    ///
    /// Default: 10 seconds
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Timeout of a single connect attempt.
    ///
    /// Default: 10 seconds
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Maximum bytes per socket read.
    ///
    /// Default: 4096
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Reconnect automatically after a transport failure.
    ///
    /// Default: true
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Deadline used by [`Channel::call_default`].
    ///
    /// Default: 10 seconds
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Pause of the send worker when it finds the channel not connected.
    ///
    /// Default: 500 milliseconds
    pub fn send_retry_interval(mut self, interval: Duration) -> Self {
        self.config.send_retry_interval = interval;
        self
    }

    /// Bound on joining each worker during `disconnect()`.
    ///
    /// Default: 2 seconds
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.config.join_timeout = timeout;
        self
    }

    /// Largest payload accepted in either direction.
    ///
    /// Default: 16 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Validate the configuration and create the channel (not yet connected).
    pub fn build(self) -> Result<Channel> {
        Channel::new(self.config)
    }
}

struct LinkState {
    state: ConnectionState,
    backoff: Backoff,
}

/// State shared between the channel handle and its workers.
pub(crate) struct Shared {
    pub(crate) config: ChannelConfig,
    link: Mutex<LinkState>,
    state_tx: watch::Sender<ConnectionState>,
    running: AtomicBool,
    auto_reconnect: AtomicBool,
    generation: AtomicU64,
    session: Mutex<Option<Session>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    reconnecting: AtomicBool,
    wake_reconnect: Notify,
    pub(crate) queue: Arc<OutboundQueue>,
    pub(crate) demux: Demultiplexer,
    pub(crate) observers: Observers,
    next_correlation_id: AtomicU32,
}

impl Shared {
    fn new(config: ChannelConfig) -> Self {
        let backoff = Backoff::new(
            config.reconnect_delay,
            config.max_reconnect_delay,
            config.backoff_multiplier,
        );
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            auto_reconnect: AtomicBool::new(config.auto_reconnect),
            config,
            link: Mutex::new(LinkState {
                state: ConnectionState::Disconnected,
                backoff,
            }),
            state_tx,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            session: Mutex::new(None),
            reconnect_task: Mutex::new(None),
            reconnecting: AtomicBool::new(false),
            wake_reconnect: Notify::new(),
            queue: Arc::new(OutboundQueue::new()),
            demux: Demultiplexer::new(),
            observers: Observers::new(),
            next_correlation_id: AtomicU32::new(1),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn should_reconnect(&self) -> bool {
        self.is_running() && self.auto_reconnect.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectionState {
        lock(&self.link).state
    }

    /// Fresh correlation id; never [`UNCORRELATED`].
    pub(crate) fn next_correlation_id(&self) -> u32 {
        loop {
            let id = self.next_correlation_id.fetch_add(1, Ordering::Relaxed);
            if id != UNCORRELATED {
                return id;
            }
        }
    }

    /// Reject payloads the peer would refuse under the shared frame limit.
    pub(crate) fn check_payload(&self, payload: &[u8]) -> Result<()> {
        let limit = self.config.max_payload_size;
        if payload.len() > limit as usize {
            return Err(ChannelError::Protocol(format!(
                "Outbound payload of {} bytes exceeds maximum {}",
                payload.len(),
                limit
            )));
        }
        Ok(())
    }

    /// Store `new` and update the watch; observers are notified separately
    /// by [`Shared::publish`], outside every lock.
    fn swap_state(
        link: &mut LinkState,
        state_tx: &watch::Sender<ConnectionState>,
        new: ConnectionState,
    ) -> ConnectionState {
        let old = std::mem::replace(&mut link.state, new);
        state_tx.send_if_modified(|current| {
            if *current == new {
                false
            } else {
                *current = new;
                true
            }
        });
        old
    }

    fn publish(&self, old: ConnectionState, new: ConnectionState) {
        if old == new {
            return;
        }
        tracing::info!(from = %old, to = %new, "Connection state changed");
        self.observers.connection.emit(&new);
    }

    fn set_state(&self, new: ConnectionState) {
        let old = {
            let mut link = lock(&self.link);
            Self::swap_state(&mut link, &self.state_tx, new)
        };
        self.publish(old, new);
    }

    /// Install a session for a freshly connected stream.
    ///
    /// Returns false when the channel was stopped meanwhile; the stream is
    /// dropped in that case.
    fn on_connected(self: &Arc<Self>, stream: TcpStream) -> bool {
        let old = {
            let mut slot = lock(&self.session);
            if !self.is_running() {
                tracing::debug!("Channel stopped while connecting, dropping stream");
                return false;
            }
            if let Some(session) = slot.as_ref() {
                tracing::debug!(
                    generation = session.generation(),
                    "Session already active, dropping duplicate stream"
                );
                return true;
            }

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let old = {
                let mut link = lock(&self.link);
                link.backoff.reset();
                Self::swap_state(&mut link, &self.state_tx, ConnectionState::Connected)
            };

            let link = Arc::new(SessionLink {
                shared: self.clone(),
                generation,
            });
            *slot = Some(Session::start(
                generation,
                stream,
                link,
                self.queue.clone(),
                &self.config,
            ));

            tracing::info!(generation, address = %self.config.address(), "Connected");
            old
        };

        self.publish(old, ConnectionState::Connected);
        true
    }

    /// Retire session `generation` after a transport failure.
    ///
    /// Reports from a session that is no longer current are ignored, which
    /// also makes the transition happen once per session.
    fn handle_disconnect(self: &Arc<Self>, generation: u64, error: ChannelError) {
        let session = {
            let mut slot = lock(&self.session);
            match slot.as_ref() {
                Some(session) if session.generation() == generation => slot.take(),
                _ => None,
            }
        };
        let Some(session) = session else {
            tracing::trace!(generation, error = %error, "Ignoring failure of a retired session");
            return;
        };
        // Usually called from one of the session's own workers: signal only.
        session.signal_stop();
        drop(session);

        tracing::warn!(generation, error = %error, "Connection lost");
        self.observers.error.emit(&error);

        if self.should_reconnect() {
            self.set_state(ConnectionState::Reconnecting);
            self.start_reconnect_worker();
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Spawn the reconnect worker unless one is already running.
    fn start_reconnect_worker(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = tokio::spawn(reconnect_loop(self.clone()));
        *lock(&self.reconnect_task) = Some(handle);
    }

    /// Resolve once the running flag is cleared.
    async fn stopped(&self) {
        loop {
            let notified = self.wake_reconnect.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    /// Backoff loop of the reconnect worker.
    ///
    /// Returns the new stream, or `None` when the channel stopped or left the
    /// reconnecting state.
    async fn retry_until_connected(&self) -> Option<TcpStream> {
        loop {
            let woken = self.wake_reconnect.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();

            if !self.is_running() || self.state() != ConnectionState::Reconnecting {
                return None;
            }

            let (delay, attempt) = {
                let link = lock(&self.link);
                (link.backoff.current(), link.backoff.attempts() + 1)
            };
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnect attempt scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut woken => tracing::debug!("Reconnect worker woken"),
            }
            if !self.is_running() {
                return None;
            }

            let result = tokio::select! {
                result = transport::connect(&self.config) => result,
                _ = self.stopped() => return None,
            };

            match result {
                Ok(stream) => return Some(stream),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                    self.observers.error.emit(&e);
                    lock(&self.link).backoff.advance();
                }
            }
        }
    }
}

async fn reconnect_loop(shared: Arc<Shared>) {
    let outcome = shared.retry_until_connected().await;
    // Cleared before installing the session so a failure of the new session
    // can start a fresh worker.
    shared.reconnecting.store(false, Ordering::SeqCst);

    match outcome {
        Some(stream) => {
            shared.on_connected(stream);
        }
        None if !shared.is_running() => shared.set_state(ConnectionState::Disconnected),
        None => {
            if shared.state() == ConnectionState::Reconnecting {
                shared.start_reconnect_worker();
            }
        }
    }
}

/// [`Link`] of one session generation.
struct SessionLink {
    shared: Arc<Shared>,
    generation: u64,
}

impl Link for SessionLink {
    fn is_connected(&self) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == self.generation
            && self.shared.state() == ConnectionState::Connected
    }

    fn on_transport_failure(&self, error: ChannelError) {
        self.shared.handle_disconnect(self.generation, error);
    }

    fn on_frame(&self, frame: Frame) {
        self.shared.observers.message.emit(&frame.payload);
        self.shared
            .demux
            .route(&frame, &self.shared.observers.notification);
    }
}

/// A resilient framed connection to one server.
///
/// Cheap operations (`send`, `state`, observers) are synchronous; operations
/// that touch the network or wait for workers are `async`.
pub struct Channel {
    pub(crate) shared: Arc<Shared>,
}

impl Channel {
    /// Create a channel from a validated configuration.
    pub fn new(config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared::new(config)),
        })
    }

    /// Create a new channel builder.
    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::new()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// Open the connection.
    ///
    /// Returns true when connected. On failure the error goes to the
    /// `on_error` observers and, with auto-reconnect enabled, the reconnect
    /// worker takes over.
    pub async fn connect(&self) -> bool {
        let shared = &self.shared;
        if self.is_connected() {
            tracing::warn!("Already connected");
            return true;
        }

        shared.running.store(true, Ordering::SeqCst);
        shared
            .auto_reconnect
            .store(shared.config.auto_reconnect, Ordering::SeqCst);
        shared.set_state(ConnectionState::Connecting);
        tracing::info!(address = %shared.config.address(), "Connecting");

        match transport::connect(&shared.config).await {
            Ok(stream) => shared.on_connected(stream),
            Err(e) => {
                tracing::error!(address = %shared.config.address(), error = %e, "Connection failed");
                shared.observers.error.emit(&e);
                if shared.should_reconnect() {
                    shared.set_state(ConnectionState::Reconnecting);
                    shared.start_reconnect_worker();
                } else {
                    shared.set_state(ConnectionState::Disconnected);
                }
                false
            }
        }
    }

    /// Close the connection and stop every worker. Idempotent.
    ///
    /// Queued outbound frames are kept for a later `connect()`.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        shared.running.store(false, Ordering::SeqCst);
        shared.auto_reconnect.store(false, Ordering::SeqCst);

        let session = lock(&shared.session).take();
        shared.set_state(ConnectionState::Disconnected);
        shared.wake_reconnect.notify_waiters();

        let timeout = shared.config.join_timeout;
        if let Some(session) = session {
            session.join(timeout).await;
        }

        let task = lock(&shared.reconnect_task).take();
        if let Some(mut task) = task {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                tracing::warn!("Reconnect worker did not stop in time, aborting");
                task.abort();
            }
        }

        tracing::debug!(queued = shared.queue.len(), "Channel disconnected");
    }

    /// Force a fresh reconnection cycle regardless of the current state.
    pub async fn reconnect(&self) {
        let shared = &self.shared;
        tracing::info!("Manual reconnect requested");

        let session = lock(&shared.session).take();
        lock(&shared.link).backoff.reset();
        shared.running.store(true, Ordering::SeqCst);
        shared.auto_reconnect.store(true, Ordering::SeqCst);
        shared.set_state(ConnectionState::Reconnecting);

        if let Some(session) = session {
            session.join(shared.config.join_timeout).await;
        }

        shared.start_reconnect_worker();
        shared.wake_reconnect.notify_waiters();
    }

    /// Queue `data` for sending.
    ///
    /// Returns false when the channel is not running or `data` is larger
    /// than `max_payload_size`. Data queued while reconnecting is sent, in
    /// order, once the connection is back.
    pub fn send(&self, data: impl Into<Bytes>) -> bool {
        if !self.shared.is_running() {
            tracing::warn!("Channel not running, send refused");
            return false;
        }
        let data = data.into();
        if let Err(e) = self.shared.check_payload(&data) {
            tracing::warn!(error = %e, "Send refused");
            return false;
        }
        self.shared.queue.push_back(OutboundFrame::uncorrelated(data));
        true
    }

    /// Write `data` ahead of the queue and wait for the write.
    ///
    /// Returns false immediately when not connected, otherwise whether the
    /// write succeeded.
    pub async fn send_now(&self, data: impl Into<Bytes>) -> bool {
        let data = data.into();
        if let Err(e) = self.shared.check_payload(&data) {
            tracing::warn!(error = %e, "Send refused");
            return false;
        }
        let urgent = {
            let slot = lock(&self.shared.session);
            match slot.as_ref() {
                Some(session) if self.is_connected() => session.urgent(),
                _ => return false,
            }
        };

        let (reply, written) = oneshot::channel();
        let item = UrgentFrame {
            frame: OutboundFrame::uncorrelated(data),
            reply,
        };
        if urgent.send(item).await.is_err() {
            return false;
        }
        matches!(written.await, Ok(Ok(())))
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watch receiver following every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Number of frames waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Consecutive failed reconnect attempts since the last success.
    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.shared.link).backoff.attempts()
    }

    /// Observe every inbound payload (heartbeats excluded).
    pub fn on_message<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        let observers = &self.shared.observers;
        observers.add(&observers.message, Arc::new(callback))
    }

    /// Observe state transitions.
    pub fn on_connection_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let observers = &self.shared.observers;
        observers.add(
            &observers.connection,
            Arc::new(move |state: &ConnectionState| callback(*state)),
        )
    }

    /// Observe transport errors.
    pub fn on_error<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChannelError) + Send + Sync + 'static,
    {
        let observers = &self.shared.observers;
        observers.add(&observers.error, Arc::new(callback))
    }

    /// Remove an observer or notification subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.observers.remove(id)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let shared = &self.shared;
        shared.running.store(false, Ordering::SeqCst);
        shared.auto_reconnect.store(false, Ordering::SeqCst);
        if let Some(session) = lock(&shared.session).take() {
            session.signal_stop();
        }
        shared.wake_reconnect.notify_waiters();
        if let Some(task) = lock(&shared.reconnect_task).take() {
            task.abort();
        }
    }
}
