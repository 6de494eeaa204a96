//! Cooperative cancellation (spec.md §9 design notes: "cooperative
//! cancellation without language primitives"). The original runtime this
//! spec was distilled from has no way to abort a running task short of the
//! task checking a flag itself; Rust gives us a real primitive for that --
//! racing the task's future against a cancellation signal with
//! `tokio::select!` -- so `CancelToken` is a thin wrapper around that
//! instead of a hand-rolled poll loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, thiserror::Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called. Safe to call from multiple
    /// places concurrently; does not consume the cancellation.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Races `fut` against cancellation. If `cancel()` is called first, the
    /// future is dropped in place and `Err(Cancelled)` is returned -- the
    /// module's own future is responsible for releasing any resources it
    /// holds when dropped mid-poll.
    pub async fn wrap<F, T>(&self, fut: F) -> Result<T, Cancelled>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            biased;
            () = self.cancelled() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wrap_returns_ok_when_future_finishes_first() {
        let token = CancelToken::new();
        let result = token.wrap(async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn wrap_returns_cancelled_when_token_is_cancelled_first() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.wrap(std::future::pending::<()>()).await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel();
        let result = handle.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancel_before_wrap_is_called_is_observed_immediately() {
        let token = CancelToken::new();
        token.cancel();
        let result = token.wrap(std::future::pending::<()>()).await;
        assert!(result.is_err());
    }
}
