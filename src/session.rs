//! One connection generation: the transport halves plus the workers that
//! own them.
//!
//! A [`Session`] is created for every successful connect and torn down as a
//! unit. Workers report back to the channel through the [`Link`] trait,
//! tagged with the generation they belong to, so a worker of a replaced
//! session cannot disturb its successor.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::heartbeat::heartbeat_loop;
use crate::protocol::Frame;
use crate::queue::OutboundQueue;
use crate::reader::receive_loop;
use crate::writer::{send_loop, UrgentFrame};

/// Capacity of the urgent lane (heartbeats and `send_now`).
const URGENT_LANE_CAPACITY: usize = 16;

/// Callbacks from session workers into the owning channel.
pub(crate) trait Link: Send + Sync + 'static {
    /// Whether this session is the current one and the channel is connected.
    fn is_connected(&self) -> bool;

    /// A transport failure was observed; the session is finished.
    fn on_transport_failure(&self, error: ChannelError);

    /// A complete, non-heartbeat frame arrived.
    fn on_frame(&self, frame: Frame);
}

/// Receiving half of a session stop signal.
#[derive(Clone)]
pub(crate) struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    /// Resolve once stop was requested or the session was dropped.
    pub(crate) async fn wait(&mut self) {
        loop {
            if *self.0.borrow() {
                return;
            }
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

pub(crate) fn shutdown_signal() -> (watch::Sender<bool>, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (tx, Shutdown(rx))
}

/// Handle to the workers of one connection generation.
pub(crate) struct Session {
    generation: u64,
    stop: watch::Sender<bool>,
    urgent: mpsc::Sender<UrgentFrame>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Session {
    /// Split `stream` and spawn the receive, send and (unless disabled)
    /// heartbeat workers.
    pub(crate) fn start<L>(
        generation: u64,
        stream: TcpStream,
        link: Arc<L>,
        queue: Arc<OutboundQueue>,
        config: &ChannelConfig,
    ) -> Self
    where
        L: Link,
    {
        let (read_half, write_half) = stream.into_split();
        let (stop, shutdown) = shutdown_signal();
        let (urgent, urgent_rx) = mpsc::channel(URGENT_LANE_CAPACITY);

        let mut tasks = Vec::with_capacity(3);
        tasks.push((
            "receive",
            tokio::spawn(receive_loop(
                read_half,
                link.clone(),
                config.buffer_size,
                config.max_payload_size,
                shutdown.clone(),
            )),
        ));
        tasks.push((
            "send",
            tokio::spawn(send_loop(
                write_half,
                queue,
                urgent_rx,
                link.clone(),
                shutdown.clone(),
                config.send_retry_interval,
            )),
        ));
        if !config.heartbeat_interval.is_zero() {
            tasks.push((
                "heartbeat",
                tokio::spawn(heartbeat_loop(
                    urgent.clone(),
                    link,
                    config.heartbeat_interval,
                    shutdown,
                )),
            ));
        }

        tracing::debug!(generation, workers = tasks.len(), "Session started");

        Self {
            generation,
            stop,
            urgent,
            tasks,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Sender for the urgent lane of this session's send worker.
    pub(crate) fn urgent(&self) -> mpsc::Sender<UrgentFrame> {
        self.urgent.clone()
    }

    /// Ask every worker to stop without waiting for them.
    pub(crate) fn signal_stop(&self) {
        self.stop.send_replace(true);
    }

    /// Stop the workers and wait for each at most `timeout`; stragglers are
    /// aborted.
    pub(crate) async fn join(mut self, timeout: Duration) {
        self.signal_stop();
        for (name, mut handle) in std::mem::take(&mut self.tasks) {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => {
                    tracing::trace!(generation = self.generation, worker = name, "Worker stopped");
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        generation = self.generation,
                        worker = name,
                        error = %e,
                        "Worker task failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        generation = self.generation,
                        worker = name,
                        timeout_ms = timeout.as_millis() as u64,
                        "Worker did not stop in time, aborting"
                    );
                    handle.abort();
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}
