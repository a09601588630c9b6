//! The persistence seam used by the generation lifecycle.
//!
//! [`TaskStore::apply`] is the only way to change a task's status. It is a
//! compare-and-set on `version`: a stale writer gets `Ok(None)` back and
//! nothing is written.

use async_trait::async_trait;
use imagegen_core::task_status::TaskStatus;
use imagegen_core::types::{DbId, TaskId, Timestamp};
use sqlx::PgPool;

use crate::models::generation_task::{
    ExternalHandle, GenerationTask, NewGenerationTask, TaskListQuery, TaskStats,
};
use crate::models::image::{Completion, Image};
use crate::repositories::{GenerationTaskRepo, ImageRepo};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// A requested status change and the data written with it.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskTransition {
    /// About to call `provider` with `model`.
    Processing { provider: String, model: String },
    /// Non-empty results obtained; images are created atomically.
    Completed(Completion),
    Failed { error: String },
    Cancelled,
}

impl TaskTransition {
    /// The status this transition moves a task into.
    pub fn target(&self) -> TaskStatus {
        match self {
            TaskTransition::Processing { .. } => TaskStatus::Processing,
            TaskTransition::Completed(_) => TaskStatus::Completed,
            TaskTransition::Failed { .. } => TaskStatus::Failed,
            TaskTransition::Cancelled => TaskStatus::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new `pending` task.
    async fn create(&self, input: NewGenerationTask) -> Result<GenerationTask, StoreError>;

    async fn find(&self, id: TaskId) -> Result<Option<GenerationTask>, StoreError>;

    /// Apply `transition` if the task is still at `expected_version` and its
    /// current status allows the edge. Returns the updated task, or `None`
    /// when another writer got there first.
    async fn apply(
        &self,
        id: TaskId,
        expected_version: i32,
        transition: TaskTransition,
    ) -> Result<Option<GenerationTask>, StoreError>;

    /// Record the provider-side handle together with the provider, model
    /// and clamped parameters it was submitted with. Does not bump
    /// `version`. Returns `false` unless processing.
    async fn attach_external_id(&self, id: TaskId, handle: &ExternalHandle) -> Result<bool, StoreError>;

    /// Processing or completed tasks of `user_id` created since `since`,
    /// optionally only those routed to `provider`.
    async fn count_admitted_since(
        &self,
        user_id: DbId,
        since: Timestamp,
        provider: Option<&str>,
    ) -> Result<i64, StoreError>;

    async fn list_by_user(
        &self,
        user_id: DbId,
        query: &TaskListQuery,
    ) -> Result<Vec<GenerationTask>, StoreError>;

    async fn stats_by_user(&self, user_id: DbId) -> Result<TaskStats, StoreError>;

    async fn images_for_task(&self, id: TaskId) -> Result<Vec<Image>, StoreError>;

    /// Liveness check for `/health`.
    async fn ping(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// [`TaskStore`] backed by the `generation_tasks` and `images` tables.
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn complete(
        &self,
        id: TaskId,
        expected_version: i32,
        completion: &Completion,
    ) -> Result<Option<GenerationTask>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(task) =
            GenerationTaskRepo::complete(&mut *tx, id, expected_version, completion).await?
        else {
            // Nothing to roll back; dropping the transaction aborts it.
            return Ok(None);
        };
        let images = ImageRepo::create_for_task(&mut *tx, &task, completion).await?;
        tx.commit().await?;

        tracing::debug!(task_id = %id, images = images.len(), "Task completion persisted");
        Ok(Some(task))
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, input: NewGenerationTask) -> Result<GenerationTask, StoreError> {
        Ok(GenerationTaskRepo::create(&self.pool, &input).await?)
    }

    async fn find(&self, id: TaskId) -> Result<Option<GenerationTask>, StoreError> {
        Ok(GenerationTaskRepo::find_by_id(&self.pool, id).await?)
    }

    async fn apply(
        &self,
        id: TaskId,
        expected_version: i32,
        transition: TaskTransition,
    ) -> Result<Option<GenerationTask>, StoreError> {
        let updated = match &transition {
            TaskTransition::Processing { provider, model } => {
                GenerationTaskRepo::mark_processing(&self.pool, id, expected_version, provider, model)
                    .await?
            }
            TaskTransition::Completed(completion) => {
                self.complete(id, expected_version, completion).await?
            }
            TaskTransition::Failed { error } => {
                GenerationTaskRepo::fail(&self.pool, id, expected_version, error).await?
            }
            TaskTransition::Cancelled => {
                GenerationTaskRepo::cancel(&self.pool, id, expected_version).await?
            }
        };
        Ok(updated)
    }

    async fn attach_external_id(&self, id: TaskId, handle: &ExternalHandle) -> Result<bool, StoreError> {
        Ok(GenerationTaskRepo::attach_external_id(&self.pool, id, handle).await?)
    }

    async fn count_admitted_since(
        &self,
        user_id: DbId,
        since: Timestamp,
        provider: Option<&str>,
    ) -> Result<i64, StoreError> {
        Ok(GenerationTaskRepo::count_admitted_since(&self.pool, user_id, since, provider).await?)
    }

    async fn list_by_user(
        &self,
        user_id: DbId,
        query: &TaskListQuery,
    ) -> Result<Vec<GenerationTask>, StoreError> {
        Ok(GenerationTaskRepo::list_by_user(&self.pool, user_id, query).await?)
    }

    async fn stats_by_user(&self, user_id: DbId) -> Result<TaskStats, StoreError> {
        let rows = GenerationTaskRepo::count_by_status(&self.pool, user_id).await?;
        let mut stats = TaskStats::default();
        for (status_id, count) in rows {
            match TaskStatus::from_id(status_id) {
                Some(status) => stats.add(status, count),
                None => tracing::warn!(status_id, "Skipping unknown task status in stats"),
            }
        }
        Ok(stats)
    }

    async fn images_for_task(&self, id: TaskId) -> Result<Vec<Image>, StoreError> {
        Ok(ImageRepo::list_by_task(&self.pool, id).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(crate::health_check(&self.pool).await?)
    }
}
