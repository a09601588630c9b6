//! Periodic provider probing.
//!
//! Probes every configured provider once at startup and then on a fixed
//! interval. After a round where any provider failed, the next round runs
//! sooner so a recovered provider rejoins selection quickly.

use std::sync::Arc;
use std::time::Duration;

use imagegen_providers::orchestrator::Orchestrator;
use tokio_util::sync::CancellationToken;

/// Delay before re-probing after a round with failures.
pub const RETRY_AFTER_FAILURE: Duration = Duration::from_secs(60);

/// Run the probe loop until `cancel` is triggered.
pub async fn run(orchestrator: Arc<Orchestrator>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Provider health job started");

    let mut delay = Duration::ZERO;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Provider health job stopping");
                break;
            }
            _ = tokio::time::sleep(delay) => {
                let results = orchestrator.probe_all().await;
                let failed: Vec<&str> = results
                    .iter()
                    .filter(|r| !r.healthy)
                    .map(|r| r.provider.as_str())
                    .collect();

                if failed.is_empty() {
                    tracing::debug!(probed = results.len(), "Provider health: all healthy");
                    delay = interval;
                } else {
                    tracing::warn!(?failed, probed = results.len(), "Provider health: probe failures");
                    delay = next_delay(interval);
                }
            }
        }
    }
}

fn next_delay(interval: Duration) -> Duration {
    interval.min(RETRY_AFTER_FAILURE)
}

#[cfg(test)]
mod tests {
    use imagegen_providers::client::ProviderClient;
    use imagegen_providers::health::{HealthStatus, HealthTracker};
    use imagegen_providers::registry::ProviderRegistry;
    use imagegen_providers::testing::FakeProvider;

    use super::*;

    #[test]
    fn failed_round_retries_no_later_than_interval() {
        assert_eq!(next_delay(Duration::from_secs(300)), RETRY_AFTER_FAILURE);
        assert_eq!(next_delay(Duration::from_secs(10)), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn first_round_runs_immediately() {
        let alpha = Arc::new(FakeProvider::new("alpha"));
        alpha.set_probe_ok(false);
        let health = Arc::new(HealthTracker::in_memory());
        health.register("alpha", 1, true);
        let registry =
            ProviderRegistry::new(vec![alpha.clone() as Arc<dyn ProviderClient>]).unwrap();
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(registry), health.clone()));

        let cancel = CancellationToken::new();
        let job = tokio::spawn(run(orchestrator, Duration::from_secs(300), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        job.await.unwrap();

        assert_eq!(health.get("alpha").unwrap().status, HealthStatus::Unhealthy);
    }
}
