use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the task store is reachable.
    pub db_healthy: bool,
    /// Providers currently eligible for selection.
    pub providers_available: usize,
}

/// GET /health -- returns service, store and provider health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = state.generation.store().ping().await.is_ok();
    let providers_available = state
        .generation
        .orchestrator()
        .health()
        .healthy_providers()
        .len();

    let status = if db_healthy && providers_available > 0 {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        providers_available,
    })
}

/// Mount health check routes (root level, not under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
