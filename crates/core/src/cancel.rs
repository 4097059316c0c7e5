//! Cooperative cancellation.
//!
//! A [`CancelToken`] is created at run start and passed down the call
//! chain. The loop checks it at three points per iteration: loop entry,
//! before the completion call, and before each tool dispatch. In-flight
//! completion calls are raced against [`CancelToken::cancelled`] with
//! `tokio::select!` so an external `cancel()` unblocks them promptly.
//! Once observed, no further side effects are initiated; accumulated state
//! is returned, not discarded.

use tokio::sync::watch;
use tracing::debug;

/// A cloneable cancellation token. `cancel()` is idempotent and safe to
/// call from outside the run's call stack at any time.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Request cancellation. Subsequent calls are no-ops.
    pub fn cancel(&self) {
        if !*self.rx.borrow() {
            debug!("Cancellation requested");
        }
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is requested. Resolves immediately if the
    /// token is already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // The sender lives in self, so changed() cannot fail while we hold it.
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
