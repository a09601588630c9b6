//! Integration tests for the PostgreSQL task store.
//!
//! Exercises the version-checked transitions, the result/error CHECK
//! constraints, atomic image fan-out, and the daily admission count
//! against a real database.

use chrono::Utc;
use imagegen_core::generation::GenerationParams;
use imagegen_core::task_status::TaskStatus;
use imagegen_db::models::generation_task::{ExternalHandle, NewGenerationTask, TaskListQuery};
use imagegen_db::models::image::Completion;
use imagegen_db::{PgTaskStore, TaskStore, TaskTransition};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_task(user_id: i64, prompt: &str) -> NewGenerationTask {
    NewGenerationTask {
        user_id,
        prompt: prompt.to_string(),
        negative_prompt: Some("blurry".into()),
        provider: None,
        model: "stabilityai/stable-diffusion-xl-base-1.0".into(),
        parameters: GenerationParams::default(),
    }
}

fn processing(provider: &str) -> TaskTransition {
    TaskTransition::Processing {
        provider: provider.into(),
        model: "stabilityai/stable-diffusion-xl-base-1.0".into(),
    }
}

fn completion(urls: &[&str]) -> Completion {
    Completion {
        provider: "siliconflow".into(),
        model: "stabilityai/stable-diffusion-xl-base-1.0".into(),
        result_urls: urls.iter().map(|u| u.to_string()).collect(),
        width: 1024,
        height: 1024,
        generation_params: serde_json::json!({"steps": 20}),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn seeded_statuses_match_enum(pool: PgPool) {
    for status in TaskStatus::ALL {
        let (name,): (String,) = sqlx::query_as("SELECT name FROM task_statuses WHERE id = $1")
            .bind(status.id())
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(name, status.as_str());
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn create_and_find(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let task = store.create(new_task(7, "a red fox")).await.unwrap();

    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.version, 0);
    assert_eq!(task.params(), GenerationParams::default());

    let found = store.find(task.id).await.unwrap().unwrap();
    assert_eq!(found.id, task.id);
    assert_eq!(found.negative_prompt.as_deref(), Some("blurry"));
}

#[sqlx::test(migrations = "./migrations")]
async fn full_lifecycle_creates_images_atomically(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let task = store.create(new_task(7, "a red fox")).await.unwrap();

    let task = store
        .apply(task.id, task.version, processing("siliconflow"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert_eq!(task.provider.as_deref(), Some("siliconflow"));

    let done = store
        .apply(
            task.id,
            task.version,
            TaskTransition::Completed(completion(&["https://img/1.png", "https://img/2.png"])),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.completed_at.is_some());
    assert_eq!(done.result_urls.as_ref().map(Vec::len), Some(2));

    let images = store.images_for_task(done.id).await.unwrap();
    assert_eq!(images.len(), 2);
    assert!(images.iter().all(|i| i.prompt == "a red fox" && i.width == 1024));
}

#[sqlx::test(migrations = "./migrations")]
async fn duplicate_completion_is_a_noop(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let task = store.create(new_task(7, "owl")).await.unwrap();
    let task = store
        .apply(task.id, 0, processing("siliconflow"))
        .await
        .unwrap()
        .unwrap();

    let first = store
        .apply(task.id, task.version, TaskTransition::Completed(completion(&["u"])))
        .await
        .unwrap();
    let second = store
        .apply(task.id, task.version, TaskTransition::Completed(completion(&["u"])))
        .await
        .unwrap();

    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(store.images_for_task(task.id).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn cancel_rejected_once_processing(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let task = store.create(new_task(7, "owl")).await.unwrap();
    let task = store
        .apply(task.id, 0, processing("replicate"))
        .await
        .unwrap()
        .unwrap();

    let cancelled = store
        .apply(task.id, task.version, TaskTransition::Cancelled)
        .await
        .unwrap();
    assert!(cancelled.is_none());
    assert_eq!(
        store.find(task.id).await.unwrap().unwrap().status,
        TaskStatus::Processing
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn failure_records_error(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let task = store.create(new_task(7, "owl")).await.unwrap();
    let failed = store
        .apply(task.id, 0, TaskTransition::Failed { error: "no provider".into() })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("no provider"));
    assert!(failed.result_urls.is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn completed_without_results_violates_constraint(pool: PgPool) {
    let store = PgTaskStore::new(pool.clone());
    let task = store.create(new_task(7, "owl")).await.unwrap();
    let result = sqlx::query("UPDATE generation_tasks SET status_id = 3 WHERE id = $1")
        .bind(task.id)
        .execute(&pool)
        .await;
    assert!(result.is_err());
}

#[sqlx::test(migrations = "./migrations")]
async fn external_id_only_attaches_while_processing(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let task = store.create(new_task(7, "owl")).await.unwrap();
    let handle = ExternalHandle {
        external_id: "pred-1".into(),
        provider: "replicate".into(),
        model: "black-forest-labs/flux-schnell".into(),
        parameters: GenerationParams {
            width: 256,
            ..GenerationParams::default()
        },
    };
    assert!(!store.attach_external_id(task.id, &handle).await.unwrap());

    store.apply(task.id, 0, processing("replicate")).await.unwrap();
    assert!(store.attach_external_id(task.id, &handle).await.unwrap());
    let stored = store.find(task.id).await.unwrap().unwrap();
    assert_eq!(stored.external_task_id.as_deref(), Some("pred-1"));
    assert_eq!(stored.model, "black-forest-labs/flux-schnell");
    assert_eq!(stored.params().width, 256);
    assert_eq!(stored.version, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn admitted_count_by_provider(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let since = Utc::now() - chrono::Duration::minutes(5);

    for provider in ["replicate", "replicate", "siliconflow"] {
        let task = store.create(new_task(9, "owl")).await.unwrap();
        store.apply(task.id, 0, processing(provider)).await.unwrap();
    }
    store.create(new_task(9, "still pending")).await.unwrap();

    assert_eq!(store.count_admitted_since(9, since, None).await.unwrap(), 3);
    assert_eq!(
        store.count_admitted_since(9, since, Some("replicate")).await.unwrap(),
        2
    );
    assert_eq!(
        store
            .count_admitted_since(9, Utc::now() + chrono::Duration::minutes(1), None)
            .await
            .unwrap(),
        0
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn list_and_stats(pool: PgPool) {
    let store = PgTaskStore::new(pool);
    let first = store.create(new_task(3, "first")).await.unwrap();
    let second = store.create(new_task(3, "second")).await.unwrap();
    store.create(new_task(4, "other user")).await.unwrap();
    store
        .apply(first.id, 0, TaskTransition::Cancelled)
        .await
        .unwrap();

    let listed = store.list_by_user(3, &TaskListQuery::default()).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);

    let pending_only = TaskListQuery {
        status: Some(TaskStatus::Pending),
        ..Default::default()
    };
    let listed = store.list_by_user(3, &pending_only).await.unwrap();
    assert_eq!(listed.len(), 1);

    let stats = store.stats_by_user(3).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.cancelled, 1);
}
