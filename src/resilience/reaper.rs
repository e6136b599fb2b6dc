use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::metrics::AdmissionMetrics;
use crate::storage::LocalCounterBackend;

/// Periodic sweep evicting expired local counters.
///
/// Without it, high-cardinality identities (client addresses under churn)
/// would grow the local map without bound.
#[derive(Debug)]
pub struct Reaper {
    local: Arc<LocalCounterBackend>,
    metrics: Arc<AdmissionMetrics>,
    interval: Duration,
}

impl Reaper {
    pub fn new(
        local: Arc<LocalCounterBackend>,
        metrics: Arc<AdmissionMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            local,
            metrics,
            interval,
        }
    }

    /// Run a single sweep, returning the number of evicted counters
    pub fn sweep(&self) -> usize {
        let removed = self.local.reap_expired();
        let remaining = self.local.len();
        self.metrics.record_sweep(removed, remaining);
        debug!(removed, remaining, "Reaped expired local counters");
        removed
    }

    /// Start sweeping on a background task. The first sweep runs one interval from now.
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let first_sweep = Instant::now() + self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(first_sweep, self.interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    _ = &mut shutdown_rx => break,
                }
            }

            debug!("Reaper task stopped");
        });

        ReaperHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Handle to a running reaper. Dropping it stops the sweep loop.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for its task to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
