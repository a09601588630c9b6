//! Periodic cleanup of expired rate-limit windows.

use std::sync::Arc;

use imagegen_pipeline::QuotaGate;
use tokio_util::sync::CancellationToken;

/// Run the sweep loop, once per rate window, until `cancel` is triggered.
pub async fn run(gate: Arc<QuotaGate>, cancel: CancellationToken) {
    let window = gate.window();
    tracing::info!(interval_secs = window.as_secs(), "Rate window sweeper started");

    let mut interval = tokio::time::interval(window);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Rate window sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                let purged = gate.rate_store().purge_expired(window);
                if purged > 0 {
                    tracing::debug!(purged, "Rate window sweeper: dropped idle windows");
                }
            }
        }
    }
}
