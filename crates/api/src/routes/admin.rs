//! Admin-only routes for provider management.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::providers;
use crate::state::AppState;

/// Routes mounted at `/admin`.
///
/// ```text
/// GET    /providers                   -> list_providers
/// POST   /providers/health-check      -> run_health_check
/// POST   /providers/{name}/enable     -> enable_provider
/// POST   /providers/{name}/disable    -> disable_provider
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/providers", get(providers::list_providers))
        .route("/providers/health-check", post(providers::run_health_check))
        .route("/providers/{name}/enable", post(providers::enable_provider))
        .route("/providers/{name}/disable", post(providers::disable_provider))
}
