//! Selection and failover across scripted providers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use imagegen_providers::client::{GenerationRequest, ProviderClient};
use imagegen_providers::error::ProviderErrorKind;
use imagegen_providers::health::{HealthStatus, Outcome};
use imagegen_providers::orchestrator::{DispatchMode, DispatchOutcome, Route};
use imagegen_providers::testing::FakeProvider;
use imagegen_providers::{HealthTracker, Orchestrator, OrchestratorError, ProviderRegistry};
use uuid::Uuid;

struct Harness {
    orchestrator: Orchestrator,
    primary: Arc<FakeProvider>,
    secondary: Arc<FakeProvider>,
}

/// `primary` has priority 1, `secondary` priority 2.
fn harness(primary: FakeProvider, secondary: FakeProvider) -> Harness {
    let primary = Arc::new(primary);
    let secondary = Arc::new(secondary);
    let health = Arc::new(HealthTracker::in_memory());
    health.register(primary.name(), 1, true);
    health.register(secondary.name(), 2, true);

    let clients = vec![
        primary.clone() as Arc<dyn ProviderClient>,
        secondary.clone() as Arc<dyn ProviderClient>,
    ];
    let registry = Arc::new(ProviderRegistry::new(clients).unwrap());
    Harness {
        orchestrator: Orchestrator::new(registry, health),
        primary,
        secondary,
    }
}

fn default_harness() -> Harness {
    harness(FakeProvider::new("alpha"), FakeProvider::new("beta"))
}

fn mark_unhealthy(h: &Harness, name: &str) {
    for _ in 0..h.orchestrator.health().error_threshold() {
        h.orchestrator
            .health()
            .record_outcome(name, &Outcome::Failure("down".into()), Duration::from_millis(1));
    }
}

#[test]
fn selects_by_priority() {
    let h = default_harness();
    assert_eq!(h.orchestrator.select(None).unwrap().name(), "alpha");
}

#[test]
fn healthy_preferred_provider_wins() {
    let h = default_harness();
    assert_eq!(h.orchestrator.select(Some("beta")).unwrap().name(), "beta");
}

#[test]
fn unhealthy_primary_is_skipped() {
    let h = default_harness();
    mark_unhealthy(&h, "alpha");
    assert_eq!(h.orchestrator.select(None).unwrap().name(), "beta");
    assert_eq!(h.orchestrator.select(Some("alpha")).unwrap().name(), "beta");
}

#[test]
fn no_eligible_provider_is_an_error() {
    let h = default_harness();
    h.orchestrator.health().set_enabled("alpha", false);
    mark_unhealthy(&h, "beta");
    assert_matches!(
        h.orchestrator.select(None),
        Err(OrchestratorError::NoProviderAvailable)
    );
}

#[test]
fn explicit_provider_pins_route() {
    let h = default_harness();
    let route = h.orchestrator.route(Some("beta"), None).unwrap();
    assert_eq!(
        route,
        Route {
            preferred: Some("beta".into()),
            pinned: true
        }
    );
}

#[test]
fn model_alone_prefers_its_owner_without_pinning() {
    let h = default_harness();
    let route = h.orchestrator.route(None, Some("beta-model")).unwrap();
    assert_eq!(route.preferred.as_deref(), Some("beta"));
    assert!(!route.pinned);
}

#[test]
fn unknown_provider_or_model_is_rejected() {
    let h = default_harness();
    let err = h.orchestrator.route(Some("dalle"), None).unwrap_err();
    assert!(err.is_invalid_request());
    assert_matches!(err, OrchestratorError::UnknownProvider(_));

    assert_matches!(
        h.orchestrator.route(None, Some("nope")),
        Err(OrchestratorError::UnknownModel(_))
    );
    // Model that exists, but on another provider.
    assert_matches!(
        h.orchestrator.route(Some("alpha"), Some("beta-model")),
        Err(OrchestratorError::UnknownModel(_))
    );
}

#[tokio::test]
async fn succeeds_on_first_provider() {
    let h = default_harness();
    let output = h
        .orchestrator
        .generate_with_failover(&common::request("cat"), &Route::default())
        .await
        .unwrap();

    assert_eq!(output.provider, "alpha");
    assert_eq!(h.primary.calls(), 1);
    assert_eq!(h.secondary.calls(), 0);
    assert_eq!(
        h.orchestrator.health().get("alpha").unwrap().status,
        HealthStatus::Healthy
    );
}

#[tokio::test]
async fn fails_over_once_to_alternate() {
    let h = default_harness();
    h.primary.fail_next(ProviderErrorKind::Timeout);

    let output = h
        .orchestrator
        .generate_with_failover(&common::request("cat"), &Route::default())
        .await
        .unwrap();

    assert_eq!(output.provider, "beta");
    assert_eq!(output.model, "beta-model");
    assert_eq!(h.primary.calls(), 1);
    assert_eq!(h.secondary.calls(), 1);

    let alpha = h.orchestrator.health().get("alpha").unwrap();
    assert_eq!(alpha.error_count, 1);
    assert_eq!(alpha.last_error.as_deref(), Some("scripted Timeout"));
    assert_eq!(h.orchestrator.health().get("beta").unwrap().success_count, 1);
}

#[tokio::test]
async fn pinned_route_does_not_fail_over() {
    let h = default_harness();
    h.primary.fail_next(ProviderErrorKind::Api);
    let route = h.orchestrator.route(Some("alpha"), None).unwrap();

    let err = h
        .orchestrator
        .generate_with_failover(&common::request("cat"), &route)
        .await
        .unwrap_err();

    assert_matches!(err, OrchestratorError::Provider(e) if e.provider == "alpha");
    assert_eq!(h.secondary.calls(), 0);
}

#[tokio::test]
async fn both_attempts_failing_reports_both_errors() {
    let h = default_harness();
    h.primary.fail_next(ProviderErrorKind::Network);
    h.secondary.fail_next(ProviderErrorKind::EmptyResult);

    let err = h
        .orchestrator
        .generate_with_failover(&common::request("cat"), &Route::default())
        .await
        .unwrap_err();

    assert_matches!(
        &err,
        OrchestratorError::FailoverExhausted { primary, fallback }
            if primary.provider == "alpha" && fallback.provider == "beta"
    );
    // Only one failover step.
    assert_eq!(h.primary.calls(), 1);
    assert_eq!(h.secondary.calls(), 1);
}

#[tokio::test]
async fn failure_without_alternate_returns_primary_error() {
    let h = default_harness();
    h.orchestrator.health().set_enabled("beta", false);
    h.primary.fail_next(ProviderErrorKind::Api);

    let err = h
        .orchestrator
        .generate_with_failover(&common::request("cat"), &Route::default())
        .await
        .unwrap_err();
    assert_matches!(err, OrchestratorError::Provider(_));
}

#[tokio::test]
async fn alternate_uses_its_default_model() {
    let h = harness(
        FakeProvider::new("alpha").with_models(&["alpha-fast", "alpha-slow"]),
        FakeProvider::new("beta"),
    );
    h.primary.fail_next(ProviderErrorKind::Api);
    let request = GenerationRequest {
        model: Some("alpha-slow".into()),
        ..common::request("cat")
    };
    let route = h.orchestrator.route(None, Some("alpha-slow")).unwrap();

    let output = h
        .orchestrator
        .generate_with_failover(&request, &route)
        .await
        .unwrap();
    assert_eq!(output.model, "beta-model");
}

#[tokio::test]
async fn webhook_mode_submits_to_capable_provider() {
    let h = harness(
        FakeProvider::new("alpha").with_webhooks(),
        FakeProvider::new("beta"),
    );
    let request = common::request("cat");
    let route = Route::default();
    let dispatch = h.orchestrator.plan(&request, &route).unwrap();
    assert_eq!(dispatch.provider(), "alpha");
    assert!(dispatch.estimated_time() > 0.0);

    let mode = DispatchMode::Webhook {
        public_base_url: "https://api.example.com".into(),
        task_id: Uuid::now_v7(),
    };
    let outcome = h
        .orchestrator
        .execute(&dispatch, &request, &route, &mode)
        .await
        .unwrap();

    assert_matches!(outcome, DispatchOutcome::Submitted(s) if s.external_id == "alpha-ext-1");
}

#[tokio::test]
async fn webhook_mode_runs_inline_for_sync_provider() {
    let h = default_harness();
    let request = common::request("cat");
    let route = Route::default();
    let dispatch = h.orchestrator.plan(&request, &route).unwrap();
    let mode = DispatchMode::Webhook {
        public_base_url: "https://api.example.com".into(),
        task_id: Uuid::now_v7(),
    };

    let outcome = h
        .orchestrator
        .execute(&dispatch, &request, &route, &mode)
        .await
        .unwrap();
    assert_matches!(outcome, DispatchOutcome::Finished(o) if o.images.len() == 1);
}

#[tokio::test]
async fn probe_all_updates_health() {
    let h = default_harness();
    h.secondary.set_probe_ok(false);

    let results = h.orchestrator.probe_all().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().any(|r| r.provider == "alpha" && r.healthy));
    assert!(results.iter().any(|r| r.provider == "beta" && !r.healthy));

    assert!(!h.orchestrator.health().is_healthy("beta"));
    assert!(h.orchestrator.probe("gamma").await.is_none());
}

#[tokio::test]
async fn cancel_external_reaches_provider() {
    let h = default_harness();
    h.orchestrator.cancel_external("beta", "job-9").await.unwrap();
    assert_eq!(h.secondary.cancelled(), vec!["job-9"]);
    assert_matches!(
        h.orchestrator.cancel_external("gamma", "x").await,
        Err(OrchestratorError::UnknownProvider(_))
    );
}
