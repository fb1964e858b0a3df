use std::time::Duration;

use tokio::sync::watch;

/// Set-once wake-up shared between the party that ends a session and every
/// task waiting on it.
///
/// Firing only flips a `watch` value, so it can be done from any thread and
/// does not need a running runtime. Waiters subscribe on demand; dropping a
/// waiter (for example when its caller is cancelled) leaves the signal as it was.
#[derive(Debug)]
pub struct CompletionSignal {
    tx: watch::Sender<bool>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Fire the signal. Returns `true` only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Whether any task is currently suspended in [`wait`](Self::wait).
    pub fn has_waiters(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    /// Suspend until the signal fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Like [`wait`](Self::wait) but bounded. Returns whether the signal fired.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}
