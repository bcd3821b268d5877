//! Send worker: drains outbound frames onto the transport.
//!
//! # Architecture
//!
//! ```text
//! send() / call() ─► OutboundQueue ─────────┐
//!                                           ├─► Send Worker ─► TCP write half
//! heartbeat / send_now ─► urgent lane ──────┘
//! ```
//!
//! The urgent lane is always served first. Queued frames are taken in
//! batches of up to [`MAX_BATCH_SIZE`] and written with scatter/gather I/O.
//! A batch that cannot be written, or whose write is still pending when the
//! session stops, goes back to the front of the queue, so the next
//! connection retries it in order.

use std::io::IoSlice;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ChannelError, Result};
use crate::protocol::{Header, HEADER_SIZE, UNCORRELATED};
use crate::queue::OutboundQueue;
use crate::session::{Link, Shutdown};

/// Maximum frames to batch in a single write operation.
pub(crate) const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the socket.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded header (9 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for heartbeats).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Data frame carrying `payload` under `correlation_id`.
    #[inline]
    pub fn data(correlation_id: u32, payload: Bytes) -> Self {
        let header = Header::data(correlation_id, payload.len() as u32);
        Self::new(&header, payload)
    }

    /// Uncorrelated data frame.
    #[inline]
    pub fn uncorrelated(payload: Bytes) -> Self {
        Self::data(UNCORRELATED, payload)
    }

    /// Heartbeat frame (flag set, empty payload).
    #[inline]
    pub fn heartbeat() -> Self {
        Self::new(&Header::heartbeat(), Bytes::new())
    }

    /// Correlation id encoded in the header.
    #[inline]
    pub fn correlation_id(&self) -> u32 {
        u32::from_be_bytes([self.header[1], self.header[2], self.header[3], self.header[4]])
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// A frame for the urgent lane plus the slot reporting whether it was written.
pub(crate) struct UrgentFrame {
    pub(crate) frame: OutboundFrame,
    pub(crate) reply: oneshot::Sender<Result<()>>,
}

/// Main send loop of a session.
///
/// Exits on shutdown or on the first write failure, which is reported
/// through `link`. Writes race the shutdown signal, so a peer that stops
/// reading cannot hold the worker past a stop request. The write half is
/// shut down on exit.
pub(crate) async fn send_loop<W, L>(
    mut writer: W,
    queue: Arc<OutboundQueue>,
    mut urgent: mpsc::Receiver<UrgentFrame>,
    link: Arc<L>,
    mut shutdown: Shutdown,
    retry_interval: Duration,
) where
    W: AsyncWrite + Unpin,
    L: Link,
{
    loop {
        tokio::select! {
            biased;

            _ = shutdown.wait() => break,

            Some(item) = urgent.recv() => {
                let written = tokio::select! {
                    biased;
                    _ = shutdown.wait() => None,
                    result = write_batch(&mut writer, std::slice::from_ref(&item.frame)) => Some(result),
                };
                match written {
                    None => {
                        let _ = item.reply.send(Err(ChannelError::NotRunning));
                        break;
                    }
                    Some(Ok(())) => {
                        let _ = item.reply.send(Ok(()));
                    }
                    Some(Err(e)) => {
                        let _ = item.reply.send(Err(ChannelError::ConnectionClosed));
                        tracing::warn!(error = %e, "Urgent write failed");
                        link.on_transport_failure(e);
                        break;
                    }
                }
            }

            batch = queue.pop_batch(MAX_BATCH_SIZE) => {
                if !link.is_connected() {
                    tracing::trace!(frames = batch.len(), "Not connected, requeueing batch");
                    queue.requeue_front(batch);
                    tokio::select! {
                        biased;
                        _ = shutdown.wait() => break,
                        _ = tokio::time::sleep(retry_interval) => continue,
                    }
                }

                let written = tokio::select! {
                    biased;
                    _ = shutdown.wait() => None,
                    result = write_batch(&mut writer, &batch) => Some(result),
                };
                match written {
                    None => {
                        tracing::debug!(frames = batch.len(), "Stopped mid-write, requeueing batch");
                        queue.requeue_front(batch);
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, frames = batch.len(), "Write failed, requeueing batch");
                        queue.requeue_front(batch);
                        link.on_transport_failure(e);
                        break;
                    }
                    Some(Ok(())) => tracing::trace!(frames = batch.len(), "Batch written"),
                }
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::trace!(error = %e, "Write half shutdown failed");
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
///
/// Partial writes are resumed until the whole batch is on the wire.
pub(crate) async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);
    for frame in batch {
        slices.push(IoSlice::new(&frame.header));
        if !frame.payload.is_empty() {
            slices.push(IoSlice::new(&frame.payload));
        }
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();

    let written = writer.write_vectored(&slices).await?;
    if written == total_size {
        writer.flush().await?;
        return Ok(());
    }
    if written == 0 {
        return Err(write_zero());
    }

    let mut total_written = written;
    while total_written < total_size {
        let remaining_slices = build_remaining_slices(batch, total_written);
        if remaining_slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&remaining_slices).await?;
        if written == 0 {
            return Err(write_zero());
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

fn write_zero() -> ChannelError {
    ChannelError::Io(std::io::Error::new(
        std::io::ErrorKind::WriteZero,
        "write_vectored returned 0",
    ))
}

/// Build IoSlice array for remaining data after partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let header_start = skipped;
        let header_end = skipped + HEADER_SIZE;

        if skip_bytes < header_end {
            let start_in_header = skip_bytes.saturating_sub(header_start);
            slices.push(IoSlice::new(&frame.header[start_in_header..]));
        }
        skipped = header_end;

        if !frame.payload.is_empty() {
            let payload_start = skipped;
            let payload_end = skipped + frame.payload.len();

            if skip_bytes < payload_end {
                let start_in_payload = skip_bytes.saturating_sub(payload_start);
                slices.push(IoSlice::new(&frame.payload[start_in_payload..]));
            }
            skipped = payload_end;
        }
    }

    slices
}
