// =============================================================================
// Refresh Scheduler — periodic refresh cycles with graceful shutdown
// =============================================================================
//
// Runs the first cycle immediately, then one per `interval`. Stops when the
// shutdown channel fires (or its sender is dropped) or after
// `max_iterations` cycles. A shutdown that arrives mid-cycle abandons the
// cycle: in-flight cache fills are dropped without writing, so the cache is
// left exactly as it was before the cycle started.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::app_state::AppState;

pub struct RefreshScheduler {
    state: Arc<AppState>,
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(state: Arc<AppState>, interval: Duration) -> Self {
        Self { state, interval }
    }

    /// Run until shutdown or `max_iterations` cycles. Returns the number of
    /// cycles completed.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>, max_iterations: Option<u64>) -> u64 {
        info!(
            interval_secs = self.interval.as_secs(),
            max_iterations = ?max_iterations,
            "refresh scheduler started"
        );

        let mut completed = 0u64;
        loop {
            if max_iterations.is_some_and(|max| completed >= max) {
                info!(completed, "refresh scheduler reached its iteration limit");
                break;
            }

            tokio::select! {
                snapshot = self.state.refresh_now() => {
                    completed += 1;
                    if let Some(err) = &snapshot.snapshot_error {
                        warn!(cycle = %snapshot.cycle_id, error = %err, "refresh cycle degraded");
                    }
                }
                _ = shutdown.recv() => {
                    warn!("shutdown during refresh cycle — abandoning it");
                    break;
                }
            }

            if max_iterations.is_some_and(|max| completed >= max) {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => {
                    info!(completed, "refresh scheduler stopping");
                    break;
                }
            }
        }

        completed
    }
}
