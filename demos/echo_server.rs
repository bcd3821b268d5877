//! Echo Server - framed peer for trying the channel by hand.
//!
//! This example demonstrates:
//! - Reading the wire format with `FrameBuffer`
//! - Echoing every frame back with its correlation id
//! - Pushing periodic notifications (`"type": "tick"`)
//!
//! # Running
//!
//! ```text
//! cargo run --example echo_server -- 9000 5
//! cargo run --example line_client -- 127.0.0.1 9000
//! ```
//!
//! Arguments: port (default 9000) and notification period in seconds
//! (default 0, disabled). Stop the server with Ctrl+C to watch the client
//! reconnect once it is started again.

use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wirelink::codec::JsonCodec;
use wirelink::protocol::{build_frame, FrameBuffer, UNCORRELATED};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "echo_server=info,wirelink=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let port: u16 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(9000);
    let tick_secs: u64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(0);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, tick_secs, "Echo server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "Client connected");
        tokio::spawn(async move {
            if let Err(e) = serve(stream, Duration::from_secs(tick_secs)).await {
                tracing::warn!(%peer, error = %e, "Connection ended with error");
            } else {
                tracing::info!(%peer, "Client disconnected");
            }
        });
    }
}

async fn serve(stream: TcpStream, tick: Duration) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut reader, mut writer) = stream.into_split();
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; 4096];

    let mut ticker = tokio::time::interval(if tick.is_zero() { Duration::from_secs(3600) } else { tick });
    ticker.tick().await;
    let mut seq = 0u64;

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                for frame in frames.push(&buf[..n])? {
                    if frame.is_heartbeat() {
                        tracing::debug!("Heartbeat");
                        continue;
                    }
                    tracing::info!(
                        correlation_id = frame.correlation_id(),
                        payload = %String::from_utf8_lossy(frame.payload()),
                        "Echo"
                    );
                    writer.write_all(&build_frame(frame.correlation_id(), frame.payload())).await?;
                }
            }
            _ = ticker.tick(), if !tick.is_zero() => {
                seq += 1;
                let note = JsonCodec::encode(&json!({ "type": "tick", "seq": seq }))?;
                writer.write_all(&build_frame(UNCORRELATED, &note)).await?;
            }
        }
    }
}
