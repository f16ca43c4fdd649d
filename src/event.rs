//! Cross-task wake signaling for blocked readers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

// ----------------------------------------------------------------------------
// Wake Event
// ----------------------------------------------------------------------------

/// An auto-resetting, coalescing wake signal.
///
/// Clones share the same underlying flag, so a `WakeEvent` obtained from one
/// transport can be signaled from any other task or thread to interrupt a
/// blocked read. Repeated signals before a wait coalesce into one; the flag
/// resets when a waiter consumes it. A signal delivered before the waiter
/// starts waiting is never lost.
#[derive(Debug, Clone, Default)]
pub struct WakeEvent {
    inner: Arc<WakeInner>,
}

#[derive(Debug, Default)]
struct WakeInner {
    signaled: AtomicBool,
    notify: Notify,
}

impl WakeEvent {
    /// Create a new unsignaled event
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake any waiter
    pub fn signal(&self) {
        self.inner.signaled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether a signal is pending, without consuming it
    pub fn is_signaled(&self) -> bool {
        self.inner.signaled.load(Ordering::SeqCst)
    }

    /// Consume a pending signal, returning whether one was set
    pub fn take(&self) -> bool {
        self.inner.signaled.swap(false, Ordering::SeqCst)
    }

    /// Wait until the event is signaled, consuming the signal.
    ///
    /// The notification is enabled before the flag check, so a signal racing
    /// with the start of the wait still wakes it.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register for notify_waiters before checking the flag;
            // an unpolled Notified future receives nothing.
            notified.as_mut().enable();
            if self.take() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_signal_before_wait_is_not_lost() {
        let event = WakeEvent::new();
        event.signal();
        timeout(Duration::from_millis(100), event.wait())
            .await
            .expect("pre-delivered signal must wake the waiter");
    }

    #[tokio::test]
    async fn test_signal_wakes_blocked_waiter() {
        let event = WakeEvent::new();
        let waker = event.clone();
        let waiter = tokio::spawn(async move { event.wait().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        waker.signal();
        timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter must be released")
            .unwrap();
    }

    #[tokio::test]
    async fn test_signals_coalesce_and_auto_reset() {
        let event = WakeEvent::new();
        event.signal();
        event.signal();
        event.wait().await;
        // The coalesced signal was consumed: a second wait must block.
        assert!(!event.is_signaled());
        assert!(timeout(Duration::from_millis(50), event.wait())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_signal_racing_wait_start_is_not_lost() {
        // A waiter that only registers for notification after checking the
        // flag would sleep through a signal landing in that window and hang
        // here on some iteration.
        for _ in 0..1000 {
            let event = WakeEvent::new();
            let waker = event.clone();
            let signaler = tokio::spawn(async move { waker.signal() });
            timeout(Duration::from_secs(1), event.wait())
                .await
                .expect("signal racing the wait start must release the waiter");
            signaler.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_take_consumes_signal() {
        let event = WakeEvent::new();
        assert!(!event.take());
        event.signal();
        assert!(event.take());
        assert!(!event.take());
    }
}
