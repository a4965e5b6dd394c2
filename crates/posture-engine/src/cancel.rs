//! Run-wide cancellation.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cancellation signal shared by a run and everything it spawns
///
/// Cloning is cheap; every clone observes the same signal.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    /// Create a signal that has not fired
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once the signal has fired
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal has fired
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Fire the signal after `deadline` unless the returned task is aborted first
    pub fn cancel_after(&self, deadline: Duration) -> JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            tracing::warn!(?deadline, "run deadline reached, cancelling");
            signal.cancel();
        })
    }
}
