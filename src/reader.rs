//! Receive worker: reads the socket and reassembles frames.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ChannelError;
use crate::protocol::FrameBuffer;
use crate::session::{Link, Shutdown};

/// Main receive loop of a session.
///
/// Reads at most `buffer_size` bytes per call and hands every complete
/// non-heartbeat frame to `link`. A zero-length read, a socket error and a
/// framing violation all end the loop through
/// [`Link::on_transport_failure`].
pub(crate) async fn receive_loop<R, L>(
    mut reader: R,
    link: Arc<L>,
    buffer_size: usize,
    max_payload_size: u32,
    mut shutdown: Shutdown,
) where
    R: AsyncRead + Unpin,
    L: Link,
{
    let mut frames = FrameBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; buffer_size.max(1)];

    loop {
        let read = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            read = reader.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                tracing::debug!("Peer closed the connection");
                link.on_transport_failure(ChannelError::ConnectionClosed);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "Socket read failed");
                link.on_transport_failure(ChannelError::Io(e));
                break;
            }
        };

        match frames.push(&buf[..n]) {
            Ok(complete) => {
                for frame in complete {
                    if frame.is_heartbeat() {
                        tracing::trace!("Heartbeat received");
                        continue;
                    }
                    link.on_frame(frame);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Inbound stream corrupt");
                link.on_transport_failure(e);
                break;
            }
        }
    }
}
