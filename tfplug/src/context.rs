//! Context implementation for request-scoped cancellation
//!
//! Every lifecycle call receives a `Context`. It carries an optional deadline
//! and a cancellation flag shared by every context derived from it, so a host
//! stopping the provider reaches work already in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time;

/// Context carries request-scoped cancellation and deadlines
/// Pass this as first parameter to all async trait methods
#[derive(Clone)]
pub struct Context {
    cancel: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cancel: Arc::new(cancel),
            deadline: None,
        }
    }

    /// Derive a context that also expires after `timeout`.
    /// The derived context keeps the parent's deadline if that is sooner and
    /// is cancelled whenever the parent is.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };

        Self {
            cancel: Arc::clone(&self.cancel),
            deadline: Some(deadline),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn cancelled(&self) {
        let mut flag = self.cancel.subscribe();
        let signalled = async move {
            // The sender lives as long as `self`, so this only returns on cancel
            let _ = flag.wait_for(|cancelled| *cancelled).await;
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = signalled => {}
                    _ = time::sleep_until(deadline.into()) => {}
                }
            }
            None => signalled.await,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn context_timeout_cancels() {
        let ctx = Context::new().with_timeout(Duration::from_millis(100));

        assert!(!ctx.is_cancelled());

        sleep(Duration::from_millis(150)).await;

        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn context_manual_cancel() {
        let ctx = Context::new();

        assert!(!ctx.is_cancelled());

        ctx.cancel();

        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn derived_context_follows_parent_cancel() {
        let parent = Context::new();
        let child = parent.with_timeout(Duration::from_secs(60));

        parent.cancel();

        assert!(child.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("child should observe parent cancellation");
    }

    #[tokio::test]
    async fn derived_context_keeps_sooner_deadline() {
        let parent = Context::new().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(60));

        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("child should expire with the parent's deadline");
        assert!(child.is_cancelled());
    }

    #[test]
    fn cancelled_resolves_at_deadline() {
        let started = Instant::now();
        let ctx = Context::new().with_timeout(Duration::from_millis(20));

        tokio_test::block_on(ctx.cancelled());

        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(!Context::new().is_cancelled());
    }
}
