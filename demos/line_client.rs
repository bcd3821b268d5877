//! Line Client - interactive client on top of `Channel`.
//!
//! This example demonstrates:
//! - Building a channel and observing state changes and errors
//! - Sending each stdin line as a JSON request with `call_json`
//! - Printing server-pushed notifications as they arrive
//!
//! # Running
//!
//! ```text
//! cargo run --example echo_server -- 9000 5
//! cargo run --example line_client -- 127.0.0.1 9000
//! ```
//!
//! Commands: `reconnect` forces a fresh reconnection cycle, `quit` exits.
//! Any other line is sent as `{"text": <line>}`.

use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wirelink::{Channel, ChannelError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wirelink=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(9000);

    let channel = Channel::builder()
        .host(host)
        .port(port)
        .heartbeat_interval(Duration::from_secs(5))
        .build()?;

    channel.on_connection_change(|state| println!("[state] {}", state));
    channel.on_error(|e| eprintln!("[error] {}", e));
    channel.subscribe(|note| println!("[notification] {}", note.body()));

    if !channel.connect().await {
        println!("Initial connection failed, retrying in the background");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "quit" => break,
            "reconnect" => channel.reconnect().await,
            text => match channel.call_json(&json!({ "text": text }), Duration::from_secs(5)).await {
                Ok(reply) => println!("[reply] {}", reply.body()),
                Err(ChannelError::Timeout(after)) => println!("[timeout] no reply after {:?}", after),
                Err(e) => println!("[failed] {}", e),
            },
        }
    }

    channel.disconnect().await;
    Ok(())
}
