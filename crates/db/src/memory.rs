//! In-memory [`TaskStore`] for tests and database-less development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use imagegen_core::task_status::TaskStatus;
use imagegen_core::types::{DbId, TaskId, Timestamp};

use crate::models::generation_task::{
    ExternalHandle, GenerationTask, NewGenerationTask, TaskListQuery, TaskStats,
};
use crate::models::image::Image;
use crate::store::{StoreError, TaskStore, TaskTransition};

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, GenerationTask>,
    images: Vec<Image>,
}

/// Process-local task store with the same compare-and-set semantics as
/// [`crate::PgTaskStore`].
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of image rows across all tasks.
    pub fn image_count(&self) -> usize {
        self.inner.lock().map(|g| g.images.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, input: NewGenerationTask) -> Result<GenerationTask, StoreError> {
        let now = Utc::now();
        let task = GenerationTask {
            id: uuid::Uuid::now_v7(),
            user_id: input.user_id,
            prompt: input.prompt,
            negative_prompt: input.negative_prompt,
            provider: input.provider,
            model: input.model,
            status: TaskStatus::Pending,
            parameters: serde_json::to_value(input.parameters).unwrap_or_default(),
            result_urls: None,
            external_task_id: None,
            error_message: None,
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.lock()?.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn find(&self, id: TaskId) -> Result<Option<GenerationTask>, StoreError> {
        Ok(self.lock()?.tasks.get(&id).cloned())
    }

    async fn apply(
        &self,
        id: TaskId,
        expected_version: i32,
        transition: TaskTransition,
    ) -> Result<Option<GenerationTask>, StoreError> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let Some(task) = inner.tasks.get_mut(&id) else {
            return Ok(None);
        };
        if task.version != expected_version || !task.status.can_transition_to(transition.target()) {
            return Ok(None);
        }

        let now = Utc::now();
        task.status = transition.target();
        task.version += 1;
        task.updated_at = now;

        match transition {
            TaskTransition::Processing { provider, model } => {
                task.provider = Some(provider);
                task.model = model;
            }
            TaskTransition::Completed(completion) => {
                task.provider = Some(completion.provider.clone());
                task.model = completion.model.clone();
                task.result_urls = Some(completion.result_urls.clone());
                task.completed_at = Some(now);
                for url in &completion.result_urls {
                    inner.images.push(Image {
                        id: uuid::Uuid::now_v7(),
                        task_id: task.id,
                        user_id: task.user_id,
                        prompt: task.prompt.clone(),
                        negative_prompt: task.negative_prompt.clone(),
                        provider: completion.provider.clone(),
                        model: completion.model.clone(),
                        image_url: url.clone(),
                        width: completion.width,
                        height: completion.height,
                        generation_params: completion.generation_params.clone(),
                        created_at: now,
                    });
                }
            }
            TaskTransition::Failed { error } => {
                task.error_message = Some(error);
                task.completed_at = Some(now);
            }
            TaskTransition::Cancelled => {
                task.completed_at = Some(now);
            }
        }
        Ok(Some(task.clone()))
    }

    async fn attach_external_id(&self, id: TaskId, handle: &ExternalHandle) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        match guard.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Processing => {
                task.external_task_id = Some(handle.external_id.clone());
                task.provider = Some(handle.provider.clone());
                task.model = handle.model.clone();
                task.parameters = serde_json::to_value(handle.parameters).unwrap_or_default();
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_admitted_since(
        &self,
        user_id: DbId,
        since: Timestamp,
        provider: Option<&str>,
    ) -> Result<i64, StoreError> {
        let guard = self.lock()?;
        let count = guard
            .tasks
            .values()
            .filter(|t| t.user_id == user_id && t.created_at >= since)
            .filter(|t| t.status.counts_toward_quota())
            .filter(|t| provider.is_none() || t.provider.as_deref() == provider)
            .count();
        Ok(count as i64)
    }

    async fn list_by_user(
        &self,
        user_id: DbId,
        query: &TaskListQuery,
    ) -> Result<Vec<GenerationTask>, StoreError> {
        let guard = self.lock()?;
        let mut tasks: Vec<GenerationTask> = guard
            .tasks
            .values()
            .filter(|t| t.user_id == user_id)
            .filter(|t| query.status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .collect())
    }

    async fn stats_by_user(&self, user_id: DbId) -> Result<TaskStats, StoreError> {
        let guard = self.lock()?;
        let mut stats = TaskStats::default();
        for task in guard.tasks.values().filter(|t| t.user_id == user_id) {
            stats.add(task.status, 1);
        }
        Ok(stats)
    }

    async fn images_for_task(&self, id: TaskId) -> Result<Vec<Image>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.images.iter().filter(|i| i.task_id == id).cloned().collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
