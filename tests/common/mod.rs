//! Loopback test peers speaking the framed protocol.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

use wirelink::protocol::{build_frame, FrameBuffer};
use wirelink::{Channel, ConnectionState};

/// How a peer answers inbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Echo every frame back with its correlation id.
    Echo,
    /// Like `Echo`, but payloads containing `slow` are answered after 150 ms.
    SlowEcho,
    /// Read and record, never answer.
    Silent,
    /// Close every accepted connection right away.
    CloseImmediately,
    /// Hold every accepted connection open without reading from it.
    Stalled,
}

/// A running test server; aborted on drop.
pub struct Peer {
    pub port: u16,
    pub received: Arc<Mutex<Vec<Bytes>>>,
    pub heartbeats: Arc<AtomicUsize>,
    pub accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl Peer {
    pub async fn start(mode: Mode) -> Peer {
        Self::start_with(0, mode, Vec::new()).await
    }

    pub async fn start_on(port: u16, mode: Mode) -> Peer {
        Self::start_with(port, mode, Vec::new()).await
    }

    /// Start a peer that writes `greeting` (raw bytes) after each accept.
    pub async fn start_with(port: u16, mode: Mode, greeting: Vec<u8>) -> Peer {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let received = Arc::new(Mutex::new(Vec::new()));
        let heartbeats = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));

        let task = {
            let received = received.clone();
            let heartbeats = heartbeats.clone();
            let accepted = accepted.clone();
            tokio::spawn(async move {
                let mut connections = JoinSet::new();
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    connections.spawn(serve(
                        stream,
                        mode,
                        greeting.clone(),
                        received.clone(),
                        heartbeats.clone(),
                    ));
                }
            })
        };

        Peer {
            port,
            received,
            heartbeats,
            accepted,
            task,
        }
    }

    pub fn received(&self) -> Vec<Bytes> {
        self.received.lock().unwrap().clone()
    }

    /// Stop accepting and close every connection.
    pub async fn kill(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    mode: Mode,
    greeting: Vec<u8>,
    received: Arc<Mutex<Vec<Bytes>>>,
    heartbeats: Arc<AtomicUsize>,
) {
    match mode {
        Mode::CloseImmediately => return,
        Mode::Stalled => {
            let _held = stream;
            std::future::pending::<()>().await;
            return;
        }
        _ => {}
    }

    let (mut reader, mut writer) = stream.into_split();
    if !greeting.is_empty() && writer.write_all(&greeting).await.is_err() {
        return;
    }

    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let Ok(complete) = frames.push(&buf[..n]) else {
            return;
        };

        for frame in complete {
            if frame.is_heartbeat() {
                heartbeats.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            received.lock().unwrap().push(frame.payload.clone());

            match mode {
                Mode::Echo => {}
                Mode::SlowEcho => {
                    if frame.payload().windows(4).any(|w| w == b"slow") {
                        tokio::time::sleep(Duration::from_millis(150)).await;
                    }
                }
                Mode::Silent | Mode::CloseImmediately | Mode::Stalled => continue,
            }

            let reply = build_frame(frame.correlation_id(), frame.payload());
            if writer.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

/// Port that nothing listens on (bound once, then released).
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Channel with short delays suited to tests.
pub fn channel_for(port: u16) -> wirelink::ChannelBuilder {
    Channel::builder()
        .port(port)
        .reconnect_delay(Duration::from_millis(100))
        .max_reconnect_delay(Duration::from_millis(200))
        .connection_timeout(Duration::from_secs(1))
        .send_retry_interval(Duration::from_millis(20))
        .join_timeout(Duration::from_millis(500))
}

/// Wait until the channel reaches `want`.
pub async fn wait_for_state(channel: &Channel, want: ConnectionState, within: Duration) -> bool {
    let mut states = channel.state_changes();
    let reached = match tokio::time::timeout(within, states.wait_for(|state| *state == want)).await {
        Ok(result) => result.is_ok(),
        Err(_) => false,
    };
    reached
}

/// Poll `condition` every 10 ms until it holds or `within` elapses.
pub async fn eventually<F: Fn() -> bool>(condition: F, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Record every state transition of `channel`.
pub fn record_states(channel: &Channel) -> Arc<Mutex<Vec<ConnectionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    channel.on_connection_change(move |state| sink.lock().unwrap().push(state));
    states
}
