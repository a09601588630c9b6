//! Supervised background executor.
//!
//! Work spawned here is tracked so shutdown can wait for it. Failures are
//! logged, never propagated. If draining takes longer than the shutdown
//! timeout the remaining units are cancelled through a shared
//! [`CancellationToken`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Clone, Default)]
pub struct Supervisor {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown gives up waiting.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Units still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Run `work` in the background under `label`.
    pub fn spawn<F, E>(&self, label: &'static str, work: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::warn!(unit = label, "Background unit cancelled");
                }
                result = work => {
                    if let Err(e) = result {
                        tracing::error!(unit = label, error = %e, "Background unit failed");
                    }
                }
            }
        });
    }

    /// Wait until every unit spawned so far has finished. New units may be
    /// spawned afterwards.
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop accepting work and wait up to `timeout` for running units.
    /// Returns `true` when everything finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, "Draining background work");
        }

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining = self.tracker.len(),
                    timeout_secs = timeout.as_secs(),
                    "Background work did not drain in time, cancelling",
                );
                self.cancel.cancel();
                self.tracker.wait().await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn settle_waits_for_spawned_units() {
        let supervisor = Supervisor::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            supervisor.spawn("count", async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            });
        }
        supervisor.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn failing_unit_does_not_poison_supervisor() {
        let supervisor = Supervisor::new();
        supervisor.spawn("fails", async { Err::<(), _>("boom") });
        supervisor.settle().await;

        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);
        supervisor.spawn("after", async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        });
        assert!(supervisor.shutdown(Duration::from_secs(1)).await);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_cancels_units_that_outlive_timeout() {
        let supervisor = Supervisor::new();
        supervisor.spawn("stuck", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, String>(())
        });

        let drained = supervisor.shutdown(Duration::from_millis(20)).await;
        assert!(!drained);
        assert!(supervisor.cancel_token().is_cancelled());
        assert!(supervisor.is_empty());
    }
}
