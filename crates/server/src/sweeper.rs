//! Periodic eviction of abandoned transfers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use pondrelay_transfer::TransferRegistry;

/// Spawns a task that sweeps `registry` every `every` until `cancel` fires.
///
/// Returns `None` when either duration is zero (sweeping disabled).
pub fn spawn_sweeper(
    registry: Arc<TransferRegistry>,
    ttl: Duration,
    every: Duration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if ttl.is_zero() || every.is_zero() {
        tracing::info!("transfer sweep disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let registry = Arc::clone(&registry);
            match tokio::task::spawn_blocking(move || registry.sweep(ttl)).await {
                Ok(Ok(report)) if report.is_empty() => {}
                Ok(Ok(report)) => tracing::info!(
                    evicted = report.evicted.len(),
                    removed_dirs = report.removed_dirs.len(),
                    "swept stale transfers"
                ),
                Ok(Err(e)) => tracing::warn!("transfer sweep failed: {e}"),
                Err(e) => tracing::error!("sweep task panicked: {e}"),
            }
        }
        tracing::debug!("sweeper stopped");
    }))
}
