//! Image records fanned out from completed generation tasks.

use imagegen_core::types::{DbId, TaskId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `images` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Image {
    pub id: uuid::Uuid,
    pub task_id: TaskId,
    pub user_id: DbId,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub provider: String,
    pub model: String,
    pub image_url: String,
    pub width: i32,
    pub height: i32,
    pub generation_params: serde_json::Value,
    pub created_at: Timestamp,
}

/// Outcome data written atomically with a task's `completed` transition.
///
/// One [`Image`] row is created per entry in `result_urls`.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub provider: String,
    pub model: String,
    pub result_urls: Vec<String>,
    pub width: i32,
    pub height: i32,
    /// Parameters actually sent to the provider after clamping.
    pub generation_params: serde_json::Value,
}
