//! Admin handlers for provider health and availability.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use imagegen_core::error::CoreError;

use crate::error::{AppError, AppResult};
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/admin/providers
///
/// Health records for every configured provider, by priority.
pub async fn list_providers(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let records = state.generation.orchestrator().health().snapshot();
    Json(DataResponse { data: records })
}

/// POST /api/v1/admin/providers/health-check
///
/// Probe every provider now and return the results.
pub async fn run_health_check(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let results = state.generation.orchestrator().probe_all().await;
    tracing::info!(
        user_id = admin.user_id,
        healthy = results.iter().filter(|r| r.healthy).count(),
        total = results.len(),
        "Manual provider health check",
    );
    Json(DataResponse { data: results })
}

/// POST /api/v1/admin/providers/{name}/enable
pub async fn enable_provider(
    admin: RequireAdmin,
    state: State<AppState>,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    set_enabled(admin, state, name, true).await
}

/// POST /api/v1/admin/providers/{name}/disable
pub async fn disable_provider(
    admin: RequireAdmin,
    state: State<AppState>,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    set_enabled(admin, state, name, false).await
}

async fn set_enabled(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    name: String,
    enabled: bool,
) -> AppResult<Json<DataResponse<imagegen_providers::health::ProviderRecord>>> {
    let record = state
        .generation
        .orchestrator()
        .health()
        .set_enabled(&name, enabled)
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "provider",
                id: name.clone(),
            })
        })?;
    tracing::info!(user_id = admin.user_id, provider = %name, enabled, "Provider toggled by admin");
    Ok(Json(DataResponse { data: record }))
}
