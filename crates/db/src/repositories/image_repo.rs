//! Repository for the `images` table.

use imagegen_core::types::TaskId;
use sqlx::{PgConnection, PgPool};

use crate::models::generation_task::GenerationTask;
use crate::models::image::{Completion, Image};

/// Column list for `images` queries.
const COLUMNS: &str = "\
    id, task_id, user_id, prompt, negative_prompt, provider, model, \
    image_url, width, height, generation_params, created_at";

pub struct ImageRepo;

impl ImageRepo {
    /// Insert one image row per result URL of a completed task.
    pub async fn create_for_task(
        conn: &mut PgConnection,
        task: &GenerationTask,
        completion: &Completion,
    ) -> Result<Vec<Image>, sqlx::Error> {
        let query = format!(
            "INSERT INTO images \
                 (id, task_id, user_id, prompt, negative_prompt, provider, model, \
                  image_url, width, height, generation_params) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {COLUMNS}"
        );

        let mut images = Vec::with_capacity(completion.result_urls.len());
        for url in &completion.result_urls {
            let image = sqlx::query_as::<_, Image>(&query)
                .bind(uuid::Uuid::now_v7())
                .bind(task.id)
                .bind(task.user_id)
                .bind(&task.prompt)
                .bind(&task.negative_prompt)
                .bind(&completion.provider)
                .bind(&completion.model)
                .bind(url)
                .bind(completion.width)
                .bind(completion.height)
                .bind(&completion.generation_params)
                .fetch_one(&mut *conn)
                .await?;
            images.push(image);
        }
        Ok(images)
    }

    /// List the images produced by a task, in creation order.
    pub async fn list_by_task(pool: &PgPool, task_id: TaskId) -> Result<Vec<Image>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM images WHERE task_id = $1 ORDER BY id");
        sqlx::query_as::<_, Image>(&query)
            .bind(task_id)
            .fetch_all(pool)
            .await
    }
}
