//! End-to-end channel tests against loopback TCP peers.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::json;

use common::{channel_for, eventually, free_port, record_states, wait_for_state, Mode, Peer};
use wirelink::protocol::{build_frame, Header};
use wirelink::{ChannelError, ConnectionState};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_serial_calls_return_in_order() {
    let peer = Peer::start(Mode::Echo).await;
    let channel = channel_for(peer.port).build().unwrap();
    assert!(channel.connect().await);

    for id in 1..=3 {
        let reply = channel
            .call_json(&json!({ "id": id }), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply.body(), &json!({ "id": id }));
        assert!(!reply.is_notification());
    }

    channel.disconnect().await;
}

#[tokio::test]
async fn test_server_restart_reconnects() {
    let peer = Peer::start(Mode::Echo).await;
    let port = peer.port;
    let channel = channel_for(port).build().unwrap();
    let states = record_states(&channel);

    assert!(channel.connect().await);
    peer.kill().await;

    assert!(wait_for_state(&channel, ConnectionState::Reconnecting, WAIT).await);

    let _peer = Peer::start_on(port, Mode::Echo).await;
    assert!(wait_for_state(&channel, ConnectionState::Connected, WAIT).await);

    let reply = channel
        .call(r#"{"after":"restart"}"#, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(reply.get("after"), Some(&json!("restart")));

    let states = states.lock().unwrap().clone();
    let connected_at = states
        .iter()
        .position(|s| *s == ConnectionState::Connected)
        .unwrap();
    assert_eq!(states[connected_at + 1], ConnectionState::Reconnecting);
    assert_eq!(states.last(), Some(&ConnectionState::Connected));
    assert_eq!(channel.reconnect_attempts(), 0);

    channel.disconnect().await;
}

#[tokio::test]
async fn test_call_times_out_against_silent_server() {
    let peer = Peer::start(Mode::Silent).await;
    let channel = channel_for(peer.port).build().unwrap();
    assert!(channel.connect().await);

    let started = Instant::now();
    let result = channel
        .call(r#"{"id":1}"#, Duration::from_millis(100))
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(ChannelError::Timeout(_))));
    assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(1), "{:?}", elapsed);
    assert_eq!(channel.state(), ConnectionState::Connected);

    channel.disconnect().await;
}

#[tokio::test]
async fn test_late_response_is_not_misattributed() {
    let peer = Peer::start(Mode::SlowEcho).await;
    let channel = channel_for(peer.port).build().unwrap();
    assert!(channel.connect().await);

    let first = channel
        .call(r#"{"req":"slow"}"#, Duration::from_millis(50))
        .await;
    assert!(matches!(first, Err(ChannelError::Timeout(_))));

    let second = channel
        .call(r#"{"req":"fast"}"#, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(second.get("req"), Some(&json!("fast")));

    channel.disconnect().await;
}

#[tokio::test]
async fn test_data_sent_while_reconnecting_is_delivered_in_order() {
    let port = free_port().await;
    let channel = channel_for(port).build().unwrap();

    assert!(!channel.connect().await);
    assert_eq!(channel.state(), ConnectionState::Reconnecting);

    for text in ["first", "second", "third"] {
        assert!(channel.send(text));
    }
    assert_eq!(channel.queued(), 3);

    let peer = Peer::start_on(port, Mode::Silent).await;
    assert!(eventually(|| peer.received().len() == 3, WAIT).await);
    assert_eq!(
        peer.received(),
        vec![
            Bytes::from_static(b"first"),
            Bytes::from_static(b"second"),
            Bytes::from_static(b"third"),
        ]
    );
    assert_eq!(channel.queued(), 0);

    channel.disconnect().await;
}

#[tokio::test]
async fn test_zero_length_read_triggers_reconnect() {
    let peer = Peer::start(Mode::CloseImmediately).await;
    let channel = channel_for(peer.port).build().unwrap();
    let states = record_states(&channel);

    channel.connect().await;
    assert!(
        eventually(
            || {
                let states = states.lock().unwrap();
                states
                    .windows(2)
                    .any(|w| w == [ConnectionState::Connected, ConnectionState::Reconnecting])
            },
            WAIT
        )
        .await
    );

    channel.disconnect().await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_zero_length_read_without_auto_reconnect() {
    let peer = Peer::start(Mode::CloseImmediately).await;
    let channel = channel_for(peer.port).auto_reconnect(false).build().unwrap();
    let errors = Arc::new(AtomicUsize::new(0));
    {
        let errors = errors.clone();
        channel.on_error(move |e| {
            assert!(e.is_transport());
            errors.fetch_add(1, Ordering::SeqCst);
        });
    }

    channel.connect().await;
    assert!(wait_for_state(&channel, ConnectionState::Disconnected, WAIT).await);
    assert!(eventually(|| errors.load(Ordering::SeqCst) >= 1, WAIT).await);
    assert_eq!(peer.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disconnect_then_connect_again() {
    let peer = Peer::start(Mode::Echo).await;
    let channel = channel_for(peer.port).build().unwrap();

    assert!(channel.connect().await);
    channel.disconnect().await;
    assert!(!channel.is_connected());

    channel.disconnect().await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    assert!(channel.connect().await);
    let reply = channel.call("[1,2,3]", Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply.body(), &json!([1, 2, 3]));

    channel.disconnect().await;
}

#[tokio::test]
async fn test_notifications_pull_and_subscribe() {
    let mut greeting = build_frame(0, br#"{"type":"new_message","text":"hi"}"#);
    greeting.extend(build_frame(0, br#"{"type":"friend_request","from":"ola"}"#));
    let peer = Peer::start_with(0, Mode::Echo, greeting).await;

    let channel = channel_for(peer.port).build().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        channel.subscribe(move |note| {
            seen.lock()
                .unwrap()
                .push(note.notification_type().unwrap_or_default().to_string());
        });
    }
    assert!(channel.connect().await);

    let first = channel.next_notification(Some(WAIT)).await.unwrap();
    let second = channel.next_notification(Some(WAIT)).await.unwrap();
    assert_eq!(first.notification_type(), Some("new_message"));
    assert_eq!(second.get("from"), Some(&json!("ola")));
    assert_eq!(*seen.lock().unwrap(), vec!["new_message", "friend_request"]);

    assert!(channel.next_notification(Some(Duration::ZERO)).await.is_none());

    let reply = channel.call(r#"{"code":200}"#, Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply.get("code"), Some(&json!(200)));

    channel.disconnect().await;
}

#[tokio::test]
async fn test_panicking_observer_does_not_break_channel() {
    let peer = Peer::start(Mode::Echo).await;
    let channel = channel_for(peer.port).build().unwrap();

    channel.on_connection_change(|_| panic!("observer bug"));
    channel.on_message(|_| panic!("observer bug"));
    let messages = Arc::new(AtomicUsize::new(0));
    {
        let messages = messages.clone();
        channel.on_message(move |_| {
            messages.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(channel.connect().await);
    let reply = channel.call(r#"{"ok":true}"#, Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply.get("ok"), Some(&json!(true)));
    assert_eq!(messages.load(Ordering::SeqCst), 1);
    assert!(channel.is_connected());

    channel.disconnect().await;
}

#[tokio::test]
async fn test_heartbeats_flow_but_are_not_delivered() {
    let mut greeting = Header::heartbeat().encode().to_vec();
    greeting.extend(build_frame(0, br#"{"hello":1}"#));
    greeting.extend(Header::heartbeat().encode());
    let peer = Peer::start_with(0, Mode::Echo, greeting).await;

    let channel = channel_for(peer.port)
        .heartbeat_interval(Duration::from_millis(30))
        .build()
        .unwrap();
    let payloads = Arc::new(Mutex::new(Vec::new()));
    {
        let payloads = payloads.clone();
        channel.on_message(move |payload| payloads.lock().unwrap().push(payload.clone()));
    }

    assert!(channel.connect().await);
    assert!(eventually(|| peer.heartbeats.load(Ordering::SeqCst) >= 2, WAIT).await);

    assert_eq!(
        *payloads.lock().unwrap(),
        vec![Bytes::from_static(br#"{"hello":1}"#)]
    );
    assert!(peer.received().is_empty());
    assert!(channel.is_connected());

    channel.disconnect().await;
}

#[tokio::test]
async fn test_send_now_requires_connection() {
    let peer = Peer::start(Mode::Silent).await;
    let channel = channel_for(peer.port).build().unwrap();

    assert!(!channel.send_now("too early").await);

    assert!(channel.connect().await);
    assert!(channel.send_now("urgent").await);
    assert!(eventually(|| peer.received().len() == 1, WAIT).await);
    assert_eq!(peer.received()[0], Bytes::from_static(b"urgent"));

    channel.disconnect().await;
    assert!(!channel.send_now("too late").await);
}

#[tokio::test]
async fn test_manual_reconnect_starts_new_session() {
    let peer = Peer::start(Mode::Echo).await;
    let channel = channel_for(peer.port).build().unwrap();

    assert!(channel.connect().await);
    channel.reconnect().await;
    assert_eq!(channel.state(), ConnectionState::Reconnecting);

    assert!(wait_for_state(&channel, ConnectionState::Connected, WAIT).await);
    assert!(eventually(|| peer.accepted.load(Ordering::SeqCst) == 2, WAIT).await);

    let reply = channel.call(r#"{"n":2}"#, Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply.get("n"), Some(&json!(2)));

    channel.disconnect().await;
}

#[tokio::test]
async fn test_unsubscribed_observer_is_not_called() {
    let peer = Peer::start(Mode::Echo).await;
    let channel = channel_for(peer.port).build().unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let id = {
        let calls = calls.clone();
        channel.on_message(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert!(channel.unsubscribe(id));
    assert!(!channel.unsubscribe(id));

    assert!(channel.connect().await);
    channel.call("{}", Duration::from_secs(2)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    channel.disconnect().await;
}

#[tokio::test]
async fn test_oversized_payload_is_refused_before_queueing() {
    let peer = Peer::start(Mode::Silent).await;
    let channel = channel_for(peer.port).max_payload_size(1024).build().unwrap();
    assert!(channel.connect().await);

    assert!(!channel.send(vec![b'x'; 2048]));
    assert!(!channel.send_now(vec![b'x'; 2048]).await);
    let call = channel.call(vec![b'x'; 2048], Duration::from_secs(1)).await;
    assert!(matches!(call, Err(ChannelError::Protocol(_))));
    assert_eq!(channel.queued(), 0);

    assert!(channel.send("after"));
    assert!(eventually(|| peer.received().len() == 1, WAIT).await);
    assert_eq!(peer.received()[0], Bytes::from_static(b"after"));
    assert_eq!(peer.accepted.load(Ordering::SeqCst), 1);
    assert!(channel.is_connected());

    channel.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_during_stalled_write_keeps_batch() {
    const FRAMES: usize = 32;
    const SIZE: usize = 1 << 20;

    let stalled = Peer::start(Mode::Stalled).await;
    let port = stalled.port;
    let channel = channel_for(port).build().unwrap();
    assert!(channel.connect().await);

    for i in 0..FRAMES {
        assert!(channel.send(vec![i as u8; SIZE]));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(channel.queued(), 0);

    let started = Instant::now();
    channel.disconnect().await;
    assert!(started.elapsed() < Duration::from_millis(500), "{:?}", started.elapsed());
    assert_eq!(channel.queued(), FRAMES);

    stalled.kill().await;
    let peer = Peer::start_on(port, Mode::Silent).await;
    assert!(channel.connect().await);

    assert!(eventually(|| peer.received().len() == FRAMES, Duration::from_secs(10)).await);
    let received = peer.received();
    for (i, payload) in received.iter().enumerate() {
        assert_eq!(payload.len(), SIZE);
        assert_eq!(payload[0], i as u8);
    }
    assert_eq!(channel.queued(), 0);

    channel.disconnect().await;
}
