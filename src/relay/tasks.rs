//! Supervised group of background relay tasks.
//!
//! The ingress side hands every relay to [`RelayTasks`] instead of detaching
//! it, so shutdown can wait for in-flight relays for a bounded time and then
//! cancel whatever is left.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::throttle::Throttle;

#[derive(Clone, Default)]
pub struct RelayTasks {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Relays still running when the grace period ran out
    pub abandoned: usize,
}

impl RelayTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` in the background under supervision.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = task => {}
            }
        });
    }

    /// Number of relays currently running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait up to `grace` for running relays, then cancel the rest.
    ///
    /// Cancelled relays drop their events; their throttle slots are released
    /// as the tasks unwind.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.drain(grace, || {}).await
    }

    /// Like [`RelayTasks::shutdown`], but closes `throttle` once the grace
    /// period runs out, so no outbound call starts after that point.
    pub async fn shutdown_closing(
        &self,
        grace: Duration,
        throttle: &Throttle,
    ) -> ShutdownReport {
        self.drain(grace, || throttle.close()).await
    }

    async fn drain(&self, grace: Duration, on_expiry: impl FnOnce()) -> ShutdownReport {
        self.tracker.close();

        let pending = self.tracker.len();
        if pending > 0 {
            info!("Waiting up to {:?} for {} in-flight relays", grace, pending);
        }

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            return ShutdownReport { abandoned: 0 };
        }

        on_expiry();
        let abandoned = self.tracker.len();
        warn!("Grace period expired, abandoning {} in-flight relays", abandoned);
        self.cancel.cancel();
        self.tracker.wait().await;

        ShutdownReport { abandoned }
    }
}
