//! Heartbeat worker: periodic liveness probe while connected.
//!
//! Every `interval` a heartbeat frame goes through the urgent lane of the
//! send worker. A failed write is reported by the send worker itself, so
//! this loop only has to stop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::session::{Link, Shutdown};
use crate::writer::{OutboundFrame, UrgentFrame};

pub(crate) async fn heartbeat_loop<L>(
    urgent: mpsc::Sender<UrgentFrame>,
    link: Arc<L>,
    interval: Duration,
    mut shutdown: Shutdown,
) where
    L: Link,
{
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }

        if !link.is_connected() {
            break;
        }

        let (reply, written) = oneshot::channel();
        let item = UrgentFrame {
            frame: OutboundFrame::heartbeat(),
            reply,
        };
        if urgent.send(item).await.is_err() {
            tracing::debug!("Send worker gone, heartbeat stopping");
            break;
        }

        let outcome = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            outcome = written => outcome,
        };
        match outcome {
            Ok(Ok(())) => tracing::trace!("Heartbeat sent"),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Heartbeat write failed");
                break;
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use crate::protocol::Frame;
    use crate::session::shutdown_signal;
    use crate::queue::OutboundQueue;
    use crate::writer::send_loop;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Flag(AtomicBool);

    impl Link for Flag {
        fn is_connected(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
        fn on_transport_failure(&self, _error: ChannelError) {}
        fn on_frame(&self, _frame: Frame) {}
    }

    #[tokio::test]
    async fn test_sends_heartbeat_each_interval() {
        let (tx, mut rx) = mpsc::channel(4);
        let (stop, shutdown) = shutdown_signal();
        let link = Arc::new(Flag(AtomicBool::new(true)));

        let task = tokio::spawn(heartbeat_loop(tx, link, Duration::from_millis(20), shutdown));

        for _ in 0..2 {
            let item: UrgentFrame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(item.frame.payload.is_empty());
            assert_eq!(item.frame.header[0], crate::protocol::flags::HEARTBEAT);
            let _ = item.reply.send(Ok(()));
        }

        stop.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stops_after_failed_write() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_stop, shutdown) = shutdown_signal();
        let link = Arc::new(Flag(AtomicBool::new(true)));

        let task = tokio::spawn(heartbeat_loop(tx, link, Duration::from_millis(10), shutdown));

        let item = rx.recv().await.unwrap();
        let _ = item.reply.send(Err(ChannelError::ConnectionClosed));

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    struct Counting {
        failures: AtomicUsize,
    }

    impl Link for Counting {
        fn is_connected(&self) -> bool {
            true
        }
        fn on_transport_failure(&self, error: ChannelError) {
            assert!(error.is_transport());
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
        fn on_frame(&self, _frame: Frame) {}
    }

    #[tokio::test]
    async fn test_heartbeat_to_dead_peer_reports_failure() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);

        let link = Arc::new(Counting {
            failures: AtomicUsize::new(0),
        });
        let (urgent_tx, urgent_rx) = mpsc::channel(4);
        let (_stop, shutdown) = shutdown_signal();

        let writer = tokio::spawn(send_loop(
            client,
            Arc::new(OutboundQueue::new()),
            urgent_rx,
            link.clone(),
            shutdown.clone(),
            Duration::from_millis(10),
        ));
        let heartbeat = tokio::spawn(heartbeat_loop(
            urgent_tx,
            link.clone(),
            Duration::from_millis(10),
            shutdown,
        ));

        for task in [writer, heartbeat] {
            tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(link.failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stops_when_not_connected() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_stop, shutdown) = shutdown_signal();
        let link = Arc::new(Flag(AtomicBool::new(false)));

        tokio::time::timeout(
            Duration::from_secs(1),
            heartbeat_loop(tx, link, Duration::from_millis(10), shutdown),
        )
        .await
        .unwrap();

        assert!(rx.try_recv().is_err());
    }
}
