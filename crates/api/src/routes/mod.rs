pub mod admin;
pub mod generation;
pub mod health;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /generations                          submit, list (auth)
/// /generations/stats                    per-status counts
/// /generations/models                   model catalog
/// /generations/{id}                     task with images
/// /generations/{id}/cancel              cancel pending task (POST)
///
/// /webhooks/{provider}/{task_id}        provider callback (public)
///
/// /admin/providers                      health records (admin only)
/// /admin/providers/health-check         probe all now (POST)
/// /admin/providers/{name}/enable        (POST)
/// /admin/providers/{name}/disable       (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/generations", generation::router())
        .nest("/webhooks", webhooks::router())
        .nest("/admin", admin::router())
}
