use boxoffice_order::ReservationManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Periodic expiry sweep. Each pass retires due holds and returns their
/// stock; the per-row conditional transitions make overlapping passes
/// harmless.
pub fn spawn_sweeper(
    manager: Arc<ReservationManager>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = manager.sweep_expired().await {
                error!(error = %e, "expiry sweep failed");
            }
        }
    })
}
