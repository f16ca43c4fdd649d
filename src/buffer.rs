//! Inbound byte accumulation and the blocking-read race
//!
//! Notification delivery is event-driven with arbitrary chunk sizes; reads
//! are size-driven and blocking. [`ByteStreamBuffer`] decouples the two: the
//! notification pump appends, readers drain, and [`wait_for_at_least`]
//! resolves the three-way race between buffer fill, external wake, and
//! timeout that the whole transport is built on.
//!
//! [`wait_for_at_least`]: ByteStreamBuffer::wait_for_at_least

use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::event::WakeEvent;

// ----------------------------------------------------------------------------
// Read Outcome
// ----------------------------------------------------------------------------

/// Why a blocking wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The size threshold was reached; the returned data is at least as long
    /// as requested
    Filled,
    /// The wake event was signaled; the returned data may be short or empty
    Cancelled,
    /// The deadline elapsed; the returned data may be short or empty
    TimedOut,
}

// ----------------------------------------------------------------------------
// Byte Stream Buffer
// ----------------------------------------------------------------------------

/// Thread-safe FIFO byte accumulator fed by inbound notification events.
///
/// Appends preserve receipt order; drains remove everything at once. The
/// buffer is unbounded.
#[derive(Debug, Default)]
pub struct ByteStreamBuffer {
    data: Mutex<Vec<u8>>,
    readable: Notify,
}

impl ByteStreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and wake any waiting reader
    pub async fn append(&self, chunk: &[u8]) {
        {
            let mut data = self.data.lock().await;
            data.extend_from_slice(chunk);
        }
        self.readable.notify_waiters();
    }

    /// Atomically remove and return the entire current contents
    pub async fn drain_all(&self) -> Vec<u8> {
        std::mem::take(&mut *self.data.lock().await)
    }

    /// Splice bytes back at the front of the stream.
    ///
    /// Used to return surplus bytes drained past an exact-size boundary.
    /// Bytes requeued here are older than anything appended concurrently,
    /// so placing them at the front preserves stream order.
    pub async fn requeue(&self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        {
            let mut data = self.data.lock().await;
            data.splice(0..0, bytes);
        }
        self.readable.notify_waiters();
    }

    /// Number of bytes waiting to be read
    pub async fn len(&self) -> usize {
        self.data.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.lock().await.is_empty()
    }

    /// Block until at least `threshold` bytes are present, the wake event is
    /// signaled, or the timeout elapses, whichever happens first, with no
    /// priority among the three. Returns the entire buffer contents (not just
    /// the first `threshold` bytes) together with the outcome tag.
    ///
    /// The notification is enabled before the fill check, so an append racing
    /// with the start of the wait is never missed. `None` timeout means an
    /// unbounded wait.
    pub async fn wait_for_at_least(
        &self,
        threshold: usize,
        timeout: Option<Duration>,
        wake: &WakeEvent,
    ) -> (Vec<u8>, ReadOutcome) {
        let filled = async {
            loop {
                let notified = self.readable.notified();
                tokio::pin!(notified);
                // Register for notify_waiters before checking the length;
                // an unpolled Notified future receives nothing.
                notified.as_mut().enable();
                if self.data.lock().await.len() >= threshold {
                    return;
                }
                notified.await;
            }
        };

        let outcome = match timeout {
            Some(limit) => {
                tokio::select! {
                    _ = filled => ReadOutcome::Filled,
                    _ = wake.wait() => ReadOutcome::Cancelled,
                    _ = tokio::time::sleep(limit) => ReadOutcome::TimedOut,
                }
            }
            None => {
                tokio::select! {
                    _ = filled => ReadOutcome::Filled,
                    _ = wake.wait() => ReadOutcome::Cancelled,
                }
            }
        };

        (self.drain_all().await, outcome)
    }
}
