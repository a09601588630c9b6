//! Repository for the `generation_tasks` table.
//!
//! Every status-changing update is guarded by `version` and by the set of
//! statuses the target state may be entered from. An update that matches
//! no row returns `None`; the caller re-reads to see who won.

use imagegen_core::task_status::{StatusId, TaskStatus};
use imagegen_core::types::{DbId, TaskId, Timestamp};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use crate::models::generation_task::{
    ExternalHandle, GenerationTask, NewGenerationTask, TaskListQuery,
};
use crate::models::image::Completion;

/// Column list for `generation_tasks` queries.
const COLUMNS: &str = "\
    id, user_id, prompt, negative_prompt, provider, model, status_id, \
    parameters, result_urls, external_task_id, error_message, version, \
    created_at, updated_at, completed_at";

/// Statuses counted against daily quotas.
const ADMITTED_STATUSES: [StatusId; 2] = [
    TaskStatus::Processing as StatusId,
    TaskStatus::Completed as StatusId,
];

/// Statuses a task may fail from.
const FAILABLE_STATUSES: [StatusId; 2] = [
    TaskStatus::Pending as StatusId,
    TaskStatus::Processing as StatusId,
];

/// Provides persistence operations for generation tasks.
pub struct GenerationTaskRepo;

impl GenerationTaskRepo {
    /// Insert a new `pending` task.
    pub async fn create(
        pool: &PgPool,
        input: &NewGenerationTask,
    ) -> Result<GenerationTask, sqlx::Error> {
        let query = format!(
            "INSERT INTO generation_tasks \
                 (id, user_id, prompt, negative_prompt, provider, model, status_id, parameters) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationTask>(&query)
            .bind(uuid::Uuid::now_v7())
            .bind(input.user_id)
            .bind(&input.prompt)
            .bind(&input.negative_prompt)
            .bind(&input.provider)
            .bind(&input.model)
            .bind(TaskStatus::Pending.id())
            .bind(Json(&input.parameters))
            .fetch_one(pool)
            .await
    }

    /// Find a task by its ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: TaskId,
    ) -> Result<Option<GenerationTask>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_tasks WHERE id = $1");
        sqlx::query_as::<_, GenerationTask>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// `pending -> processing`, recording the provider about to be called.
    pub async fn mark_processing(
        pool: &PgPool,
        id: TaskId,
        version: i32,
        provider: &str,
        model: &str,
    ) -> Result<Option<GenerationTask>, sqlx::Error> {
        let query = format!(
            "UPDATE generation_tasks \
             SET status_id = $3, provider = $4, model = $5, \
                 version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 AND status_id = $6 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationTask>(&query)
            .bind(id)
            .bind(version)
            .bind(TaskStatus::Processing.id())
            .bind(provider)
            .bind(model)
            .bind(TaskStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// `processing -> completed`. Runs on a connection so the caller can
    /// insert image rows in the same transaction.
    pub async fn complete(
        conn: &mut PgConnection,
        id: TaskId,
        version: i32,
        completion: &Completion,
    ) -> Result<Option<GenerationTask>, sqlx::Error> {
        let query = format!(
            "UPDATE generation_tasks \
             SET status_id = $3, provider = $4, model = $5, result_urls = $6, \
                 completed_at = NOW(), version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 AND status_id = $7 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationTask>(&query)
            .bind(id)
            .bind(version)
            .bind(TaskStatus::Completed.id())
            .bind(&completion.provider)
            .bind(&completion.model)
            .bind(&completion.result_urls)
            .bind(TaskStatus::Processing.id())
            .fetch_optional(conn)
            .await
    }

    /// `pending|processing -> failed` with an error description.
    pub async fn fail(
        pool: &PgPool,
        id: TaskId,
        version: i32,
        error: &str,
    ) -> Result<Option<GenerationTask>, sqlx::Error> {
        let query = format!(
            "UPDATE generation_tasks \
             SET status_id = $3, error_message = $4, completed_at = NOW(), \
                 version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 AND status_id = ANY($5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationTask>(&query)
            .bind(id)
            .bind(version)
            .bind(TaskStatus::Failed.id())
            .bind(error)
            .bind(&FAILABLE_STATUSES[..])
            .fetch_optional(pool)
            .await
    }

    /// `pending -> cancelled`.
    pub async fn cancel(
        pool: &PgPool,
        id: TaskId,
        version: i32,
    ) -> Result<Option<GenerationTask>, sqlx::Error> {
        let query = format!(
            "UPDATE generation_tasks \
             SET status_id = $3, completed_at = NOW(), \
                 version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationTask>(&query)
            .bind(id)
            .bind(version)
            .bind(TaskStatus::Cancelled.id())
            .bind(TaskStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// Record the provider-side handle of a processing task, along with the
    /// provider, model and clamped parameters it was submitted with.
    ///
    /// Returns `false` if the task is no longer processing.
    pub async fn attach_external_id(
        pool: &PgPool,
        id: TaskId,
        handle: &ExternalHandle,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_tasks \
             SET external_task_id = $2, provider = $3, model = $4, parameters = $5, \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id = $6",
        )
        .bind(id)
        .bind(&handle.external_id)
        .bind(&handle.provider)
        .bind(&handle.model)
        .bind(Json(&handle.parameters))
        .bind(TaskStatus::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count a user's processing or completed tasks created since `since`,
    /// optionally restricted to one provider.
    pub async fn count_admitted_since(
        pool: &PgPool,
        user_id: DbId,
        since: Timestamp,
        provider: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM generation_tasks \
             WHERE user_id = $1 AND created_at >= $2 AND status_id = ANY($3) \
               AND ($4::TEXT IS NULL OR provider = $4)",
        )
        .bind(user_id)
        .bind(since)
        .bind(&ADMITTED_STATUSES[..])
        .bind(provider)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// List a user's tasks, newest first, with optional status filter.
    pub async fn list_by_user(
        pool: &PgPool,
        user_id: DbId,
        params: &TaskListQuery,
    ) -> Result<Vec<GenerationTask>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_tasks \
             WHERE user_id = $1 AND ($2::SMALLINT IS NULL OR status_id = $2) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, GenerationTask>(&query)
            .bind(user_id)
            .bind(params.status.map(TaskStatus::id))
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(pool)
            .await
    }

    /// Count a user's tasks grouped by status id.
    pub async fn count_by_status(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<(StatusId, i64)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT status_id, COUNT(*) FROM generation_tasks \
             WHERE user_id = $1 GROUP BY status_id",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }
}
