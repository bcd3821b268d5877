//! Outbound frame queue shared by every connection generation.
//!
//! Producers (`send`, `call`) push to the back; the send worker of the
//! current session takes batches from the front. Frames that could not be
//! written are pushed back to the front in their original order, so the
//! queue never drops or reorders accepted data across reconnects.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::lock;
use crate::writer::OutboundFrame;

/// FIFO of encoded frames waiting for the send worker.
pub(crate) struct OutboundQueue {
    frames: Mutex<VecDeque<OutboundFrame>>,
    ready: Notify,
}

impl OutboundQueue {
    pub(crate) fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
        }
    }

    /// Append a frame and wake the send worker.
    pub(crate) fn push_back(&self, frame: OutboundFrame) {
        lock(&self.frames).push_back(frame);
        self.ready.notify_one();
    }

    /// Return an unsent batch to the front, keeping its order ahead of
    /// everything queued after it.
    pub(crate) fn requeue_front(&self, batch: Vec<OutboundFrame>) {
        if batch.is_empty() {
            return;
        }
        {
            let mut frames = lock(&self.frames);
            for frame in batch.into_iter().rev() {
                frames.push_front(frame);
            }
        }
        self.ready.notify_one();
    }

    /// Take up to `max` frames, waiting until at least one is available.
    ///
    /// Cancel safe: frames are only removed after the wait completed, so a
    /// dropped future never loses data.
    pub(crate) async fn pop_batch(&self, max: usize) -> Vec<OutboundFrame> {
        loop {
            {
                let mut frames = lock(&self.frames);
                if !frames.is_empty() {
                    let n = frames.len().min(max.max(1));
                    return frames.drain(..n).collect();
                }
            }
            // notify_one stores a permit when nobody waits, so a push between
            // the check above and this await is not missed.
            self.ready.notified().await;
        }
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.frames).len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
