//! Generation task entity, creation DTO, and listing/statistics types.

use imagegen_core::generation::GenerationParams;
use imagegen_core::task_status::TaskStatus;
use imagegen_core::types::{DbId, TaskId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `generation_tasks` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct GenerationTask {
    pub id: TaskId,
    pub user_id: DbId,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    /// Provider that served (or is serving) the task. Unset while pending.
    pub provider: Option<String>,
    pub model: String,
    #[sqlx(rename = "status_id", try_from = "i16")]
    pub status: TaskStatus,
    /// Requested [`GenerationParams`] as JSON.
    pub parameters: serde_json::Value,
    pub result_urls: Option<Vec<String>>,
    pub external_task_id: Option<String>,
    pub error_message: Option<String>,
    /// Incremented on every status transition.
    pub version: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl GenerationTask {
    /// Decode the stored parameters, falling back to defaults for rows
    /// written with a different shape.
    pub fn params(&self) -> GenerationParams {
        serde_json::from_value(self.parameters.clone()).unwrap_or_default()
    }
}

/// Input for creating a pending task.
#[derive(Debug, Clone)]
pub struct NewGenerationTask {
    pub user_id: DbId,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    /// Set when the caller pinned a provider at submission.
    pub provider: Option<String>,
    pub model: String,
    pub parameters: GenerationParams,
}

/// What was actually sent to an asynchronous provider, recorded when the
/// provider accepts the job.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalHandle {
    pub external_id: String,
    pub provider: String,
    pub model: String,
    /// Parameters after clamping to the model's limits.
    pub parameters: GenerationParams,
}

/// Query parameters for task history listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
    /// Maximum number of results. Defaults to 20, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

pub const DEFAULT_LIST_LIMIT: i64 = 20;
pub const MAX_LIST_LIMIT: i64 = 100;

impl TaskListQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Per-status task counts for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl TaskStats {
    /// Add `count` tasks of `status`.
    pub fn add(&mut self, status: TaskStatus, count: i64) {
        self.total += count;
        let slot = match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Processing => &mut self.processing,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Cancelled => &mut self.cancelled,
        };
        *slot += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_limit_is_capped() {
        let q = TaskListQuery {
            limit: Some(1000),
            ..Default::default()
        };
        assert_eq!(q.limit(), MAX_LIST_LIMIT);
        assert_eq!(TaskListQuery::default().limit(), DEFAULT_LIST_LIMIT);
    }

    #[test]
    fn negative_offset_is_zero() {
        let q = TaskListQuery {
            offset: Some(-5),
            ..Default::default()
        };
        assert_eq!(q.offset(), 0);
    }

    #[test]
    fn stats_accumulate() {
        let mut stats = TaskStats::default();
        stats.add(TaskStatus::Completed, 3);
        stats.add(TaskStatus::Failed, 1);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.failed, 1);
    }
}
