//! Handlers for the `/generations` resource.
//!
//! All endpoints require authentication via [`AuthUser`]. Users see only
//! their own tasks; admins can read any task by id.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use imagegen_core::generation::GenerationParams;
use imagegen_core::task_status::TaskStatus;
use imagegen_core::types::TaskId;
use imagegen_db::models::generation_task::{GenerationTask, TaskListQuery};
use imagegen_db::models::image::Image;
use imagegen_pipeline::SubmitRequest;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

/// Body of `POST /generations`. Omitted parameters take their defaults.
#[derive(Debug, Deserialize)]
pub struct CreateGeneration {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub steps: Option<i32>,
    pub guidance_scale: Option<f64>,
    pub seed: Option<i64>,
    pub batch_size: Option<i32>,
    #[serde(default)]
    pub use_webhook: bool,
}

impl CreateGeneration {
    fn params(&self) -> GenerationParams {
        let defaults = GenerationParams::default();
        GenerationParams {
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            steps: self.steps.unwrap_or(defaults.steps),
            guidance_scale: self.guidance_scale.unwrap_or(defaults.guidance_scale),
            seed: self.seed,
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Seconds.
    pub estimated_time: Option<f64>,
    pub task: GenerationTask,
}

#[derive(Debug, Serialize)]
pub struct TaskDetail {
    pub task: GenerationTask,
    pub images: Vec<Image>,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/generations
///
/// Inline requests return 201 with the finished (completed or failed)
/// task. With `use_webhook` the task is returned while still pending.
pub async fn submit_generation(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateGeneration>,
) -> AppResult<impl IntoResponse> {
    let params = input.params();
    let outcome = state
        .generation
        .submit(SubmitRequest {
            user_id: auth.user_id,
            tier: auth.tier,
            prompt: input.prompt,
            negative_prompt: input.negative_prompt,
            provider: input.provider,
            model: input.model,
            params,
            use_webhook: input.use_webhook,
        })
        .await?;

    let task = outcome.task;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: SubmitResponse {
                task_id: task.id,
                status: task.status,
                estimated_time: outcome.estimated_time,
                task,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// GET /api/v1/generations
///
/// The caller's tasks, newest first. Supports `status`, `limit` and
/// `offset` query parameters.
pub async fn list_generations(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<TaskListQuery>,
) -> AppResult<impl IntoResponse> {
    let tasks = state.generation.list(auth.user_id, &params).await?;
    Ok(Json(DataResponse { data: tasks }))
}

/// GET /api/v1/generations/stats
pub async fn generation_stats(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let stats = state.generation.stats(auth.user_id).await?;
    Ok(Json(DataResponse { data: stats }))
}

/// GET /api/v1/generations/models
pub async fn list_models(_auth: AuthUser, State(state): State<AppState>) -> impl IntoResponse {
    Json(DataResponse {
        data: state.generation.models(),
    })
}

/// GET /api/v1/generations/{id}
pub async fn get_generation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> AppResult<impl IntoResponse> {
    let requester = auth.requester();
    let task = state.generation.get_task(id, requester).await?;
    let images = state.generation.images(id, requester).await?;
    Ok(Json(DataResponse {
        data: TaskDetail { task, images },
    }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/generations/{id}/cancel
///
/// Only pending tasks can be cancelled; anything else is a 409.
pub async fn cancel_generation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> AppResult<impl IntoResponse> {
    let task = state.generation.cancel(id, auth.requester()).await?;
    Ok(Json(DataResponse { data: task }))
}
