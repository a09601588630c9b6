//! Public provider callback routes.

use axum::routing::post;
use axum::Router;

use crate::handlers::webhooks;
use crate::state::AppState;

/// Routes mounted at `/webhooks`.
pub fn router() -> Router<AppState> {
    Router::new().route("/{provider}/{task_id}", post(webhooks::receive_webhook))
}
