//! Route definitions for the `/generations` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::generation;
use crate::state::AppState;

/// Routes mounted at `/generations`.
///
/// ```text
/// GET    /                -> list_generations
/// POST   /                -> submit_generation
/// GET    /stats           -> generation_stats
/// GET    /models          -> list_models
/// GET    /{id}            -> get_generation
/// POST   /{id}/cancel     -> cancel_generation
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(generation::list_generations).post(generation::submit_generation),
        )
        .route("/stats", get(generation::generation_stats))
        .route("/models", get(generation::list_models))
        .route("/{id}", get(generation::get_generation))
        .route("/{id}/cancel", post(generation::cancel_generation))
}
