//! Generation task lifecycle.
//!
//! [`GenerationService`] is the only writer of task status:
//!
//! ```text
//! pending ──> processing ──> completed
//!    │             └───────> failed
//!    ├──> failed
//!    └──> cancelled
//! ```
//!
//! Every transition is a compare-and-set on the task version. Whoever loses
//! a race re-reads the task and treats it as already reconciled, so the
//! inline path, background units and webhooks can all race safely.

use std::sync::Arc;

use imagegen_core::error::CoreError;
use imagegen_core::generation::{validate_negative_prompt, validate_params, validate_prompt, GenerationParams};
use imagegen_core::quota::SubscriptionTier;
use imagegen_core::task_status::TaskStatus;
use imagegen_core::types::{DbId, TaskId};
use imagegen_db::models::generation_task::{
    ExternalHandle, GenerationTask, NewGenerationTask, TaskListQuery, TaskStats,
};
use imagegen_db::models::image::{Completion, Image};
use imagegen_db::{TaskStore, TaskTransition};
use imagegen_providers::client::{ExternalStatus, GenerationOutput, GenerationRequest};
use imagegen_providers::orchestrator::{Dispatch, DispatchMode, DispatchOutcome, Route};
use imagegen_providers::registry::ProviderCatalog;
use imagegen_providers::{Orchestrator, OrchestratorError};
use serde::Serialize;

use crate::error::GenerationError;
use crate::quota::QuotaGate;
use crate::supervisor::Supervisor;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// A user's generation request as received by the API.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub user_id: DbId,
    pub tier: SubscriptionTier,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub params: GenerationParams,
    /// Return `pending` at once and finish in the background.
    pub use_webhook: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub task: GenerationTask,
    /// Seconds, from the provider chosen at admission.
    pub estimated_time: Option<f64>,
}

/// Who is asking; admins can see every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: DbId,
    pub is_admin: bool,
}

/// A normalized provider callback.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub external_id: Option<String>,
    pub status: ExternalStatus,
    pub output_urls: Vec<String>,
    pub error: Option<String>,
}

/// What a webhook did to its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    Applied(TaskStatus),
    Ignored(&'static str),
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct GenerationService {
    store: Arc<dyn TaskStore>,
    orchestrator: Arc<Orchestrator>,
    gate: Arc<QuotaGate>,
    supervisor: Supervisor,
    public_base_url: Arc<str>,
}

impl GenerationService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        orchestrator: Arc<Orchestrator>,
        gate: Arc<QuotaGate>,
        supervisor: Supervisor,
        public_base_url: &str,
    ) -> Self {
        Self {
            store,
            orchestrator,
            gate,
            supervisor,
            public_base_url: Arc::from(public_base_url.trim_end_matches('/')),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn gate(&self) -> &QuotaGate {
        &self.gate
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Validate, admit and run a generation request.
    ///
    /// Inline requests return the terminal task. Webhook requests return the
    /// `pending` task and continue in the background. Provider failures are
    /// recorded on the task, not returned.
    pub async fn submit(&self, input: SubmitRequest) -> Result<SubmitOutcome, GenerationError> {
        let prompt = validate_prompt(&input.prompt)?;
        let negative_prompt = validate_negative_prompt(input.negative_prompt.as_deref())?;
        validate_params(&input.params)?;

        let route = self
            .orchestrator
            .route(input.provider.as_deref(), input.model.as_deref())
            .map_err(|e| {
                if e.is_invalid_request() {
                    CoreError::Validation(e.to_string())
                } else {
                    CoreError::Internal(e.to_string())
                }
            })?;

        self.gate
            .check(input.user_id, input.tier, route.preferred.as_deref())
            .await?;

        let request = GenerationRequest {
            prompt,
            negative_prompt,
            model: input.model.clone(),
            params: input.params,
        };
        let planned = self.orchestrator.plan(&request, &route);
        let (model, estimated_time) = match &planned {
            Ok(dispatch) => (dispatch.model_id().to_string(), Some(dispatch.estimated_time())),
            Err(_) => (input.model.clone().unwrap_or_default(), None),
        };

        let task = self
            .store
            .create(NewGenerationTask {
                user_id: input.user_id,
                prompt: request.prompt.clone(),
                negative_prompt: request.negative_prompt.clone(),
                provider: input.provider.clone(),
                model,
                parameters: request.params,
            })
            .await?;
        tracing::info!(
            task_id = %task.id,
            user_id = task.user_id,
            tier = %input.tier,
            webhook = input.use_webhook,
            "Generation task created",
        );

        if !input.use_webhook {
            let task = self
                .execute(task, request, route, planned, DispatchMode::Inline)
                .await?;
            return Ok(SubmitOutcome { task, estimated_time });
        }

        let mode = DispatchMode::Webhook {
            public_base_url: self.public_base_url.to_string(),
            task_id: task.id,
        };
        let service = self.clone();
        let pending = task.clone();
        self.supervisor.spawn("generation", async move {
            service
                .execute(pending, request, route, planned, mode)
                .await
                .map(|_| ())
        });

        Ok(SubmitOutcome { task, estimated_time })
    }

    /// Drive a pending task through the provider call.
    async fn execute(
        &self,
        task: GenerationTask,
        request: GenerationRequest,
        route: Route,
        planned: Result<Dispatch, OrchestratorError>,
        mode: DispatchMode,
    ) -> Result<GenerationTask, GenerationError> {
        let dispatch = match planned {
            Ok(dispatch) => dispatch,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "No provider for task");
                return self
                    .transition(&task, TaskTransition::Failed { error: e.to_string() })
                    .await;
            }
        };

        let processing = self
            .transition(
                &task,
                TaskTransition::Processing {
                    provider: dispatch.provider().to_string(),
                    model: dispatch.model_id().to_string(),
                },
            )
            .await?;
        if processing.status != TaskStatus::Processing {
            // Cancelled before a provider was called.
            return Ok(processing);
        }
        tracing::info!(
            task_id = %task.id,
            provider = dispatch.provider(),
            model = dispatch.model_id(),
            "Task processing",
        );

        match self
            .orchestrator
            .execute(&dispatch, &request, &route, &mode)
            .await
        {
            Ok(DispatchOutcome::Finished(output)) => self.complete(&processing, output).await,
            Ok(DispatchOutcome::Submitted(submission)) => {
                let handle = ExternalHandle {
                    external_id: submission.external_id,
                    provider: submission.provider,
                    model: submission.model,
                    parameters: submission.params,
                };
                if self.store.attach_external_id(processing.id, &handle).await? {
                    tracing::info!(
                        task_id = %processing.id,
                        provider = %handle.provider,
                        external_id = %handle.external_id,
                        "Task submitted, awaiting webhook",
                    );
                } else {
                    // Settled while the submission was in flight; nothing will
                    // consume this job's result.
                    self.abandon_external(processing.id, &handle.provider, &handle.external_id)
                        .await;
                }
                self.reload(processing.id).await
            }
            Err(e) => {
                tracing::warn!(task_id = %processing.id, error = %e, "Generation failed");
                self.transition(&processing, TaskTransition::Failed { error: e.to_string() })
                    .await
            }
        }
    }

    async fn complete(
        &self,
        task: &GenerationTask,
        output: GenerationOutput,
    ) -> Result<GenerationTask, GenerationError> {
        if output.images.is_empty() {
            return self
                .transition(
                    task,
                    TaskTransition::Failed {
                        error: format!("{} returned no images", output.provider),
                    },
                )
                .await;
        }
        let completion = Completion {
            provider: output.provider,
            model: output.model,
            result_urls: output.images,
            width: output.params.width,
            height: output.params.height,
            generation_params: params_json(&output.params)?,
        };
        let done = self.transition(task, TaskTransition::Completed(completion)).await?;
        if done.status == TaskStatus::Completed {
            tracing::info!(
                task_id = %done.id,
                provider = ?done.provider,
                images = done.result_urls.as_ref().map_or(0, Vec::len),
                "Task completed",
            );
        }
        Ok(done)
    }

    /// Apply `transition` at `task.version`. On a lost race the current row
    /// is returned unchanged.
    async fn transition(
        &self,
        task: &GenerationTask,
        transition: TaskTransition,
    ) -> Result<GenerationTask, GenerationError> {
        let target = transition.target();
        match self.store.apply(task.id, task.version, transition).await? {
            Some(updated) => Ok(updated),
            None => {
                tracing::debug!(
                    task_id = %task.id,
                    from = %task.status,
                    to = %target,
                    "Transition lost race, task already reconciled",
                );
                self.reload(task.id).await
            }
        }
    }

    async fn reload(&self, id: TaskId) -> Result<GenerationTask, GenerationError> {
        self.store.find(id).await?.ok_or_else(|| {
            CoreError::NotFound {
                entity: "generation_task",
                id: id.to_string(),
            }
            .into()
        })
    }

    // -----------------------------------------------------------------------
    // Webhooks
    // -----------------------------------------------------------------------

    /// Reconcile a provider callback. Anything that does not apply to a
    /// `processing` task is ignored, so repeated deliveries are harmless.
    pub async fn on_webhook(
        &self,
        task_id: TaskId,
        provider: &str,
        event: WebhookEvent,
    ) -> Result<WebhookDisposition, GenerationError> {
        let Some(task) = self.store.find(task_id).await? else {
            tracing::warn!(task_id = %task_id, provider, "Webhook for unknown task");
            return Ok(WebhookDisposition::Ignored("unknown task"));
        };
        if task.status != TaskStatus::Processing {
            tracing::info!(task_id = %task_id, status = %task.status, "Webhook for settled task ignored");
            return Ok(WebhookDisposition::Ignored("task not processing"));
        }
        if let (Some(recorded), Some(received)) = (&task.external_task_id, &event.external_id) {
            if recorded != received {
                tracing::warn!(
                    task_id = %task_id,
                    recorded = %recorded,
                    received = %received,
                    "Webhook external id mismatch",
                );
                return Ok(WebhookDisposition::Ignored("external id mismatch"));
            }
        }

        let transition = match event.status {
            ExternalStatus::InProgress => return Ok(WebhookDisposition::Ignored("in progress")),
            ExternalStatus::Succeeded if event.output_urls.is_empty() => TaskTransition::Failed {
                error: format!("{provider} returned no images"),
            },
            ExternalStatus::Succeeded => {
                let params = task.params();
                TaskTransition::Completed(Completion {
                    provider: provider.to_string(),
                    model: self.webhook_model(&task, provider),
                    result_urls: event.output_urls,
                    width: params.width,
                    height: params.height,
                    generation_params: params_json(&params)?,
                })
            }
            ExternalStatus::Failed => TaskTransition::Failed {
                error: event
                    .error
                    .unwrap_or_else(|| format!("{provider} generation failed")),
            },
            ExternalStatus::Canceled => TaskTransition::Failed {
                error: format!("{provider} canceled the prediction"),
            },
        };

        let target = transition.target();
        match self.store.apply(task.id, task.version, transition).await? {
            Some(updated) => {
                tracing::info!(task_id = %task_id, provider, status = %updated.status, "Webhook applied");
                Ok(WebhookDisposition::Applied(target))
            }
            None => {
                tracing::debug!(task_id = %task_id, "Webhook lost race, task already reconciled");
                Ok(WebhookDisposition::Ignored("already reconciled"))
            }
        }
    }

    /// Best-effort cancel of a provider job no task is waiting for.
    /// Failures are logged only.
    async fn abandon_external(&self, task_id: TaskId, provider: &str, external_id: &str) {
        match self.orchestrator.cancel_external(provider, external_id).await {
            Ok(()) => tracing::info!(
                task_id = %task_id,
                provider,
                external_id,
                "Orphaned provider job cancelled",
            ),
            Err(e) => tracing::warn!(
                task_id = %task_id,
                provider,
                external_id,
                error = %e,
                "Failed to cancel orphaned provider job",
            ),
        }
    }

    /// Model to record for a webhook completion. A callback from a provider
    /// other than the one recorded means the task failed over; that
    /// provider ran its default model.
    fn webhook_model(&self, task: &GenerationTask, provider: &str) -> String {
        if task.provider.as_deref() == Some(provider) {
            return task.model.clone();
        }
        self.orchestrator
            .registry()
            .get(provider)
            .map(|c| c.resolve_model(Some(&task.model)).id.clone())
            .unwrap_or_else(|| task.model.clone())
    }

    // -----------------------------------------------------------------------
    // Queries and cancellation
    // -----------------------------------------------------------------------

    /// Fetch a task visible to `requester`.
    pub async fn get_task(
        &self,
        id: TaskId,
        requester: Requester,
    ) -> Result<GenerationTask, GenerationError> {
        match self.store.find(id).await? {
            Some(task) if requester.is_admin || task.user_id == requester.user_id => Ok(task),
            _ => Err(CoreError::NotFound {
                entity: "generation_task",
                id: id.to_string(),
            }
            .into()),
        }
    }

    /// Cancel a task that has not reached a provider yet.
    pub async fn cancel(
        &self,
        id: TaskId,
        requester: Requester,
    ) -> Result<GenerationTask, GenerationError> {
        let task = self.get_task(id, requester).await?;
        let invalid = |from: TaskStatus| CoreError::InvalidTransition {
            from,
            to: TaskStatus::Cancelled,
        };
        if task.status != TaskStatus::Pending {
            return Err(invalid(task.status).into());
        }

        match self.store.apply(id, task.version, TaskTransition::Cancelled).await? {
            Some(cancelled) => {
                tracing::info!(task_id = %id, user_id = requester.user_id, "Task cancelled");
                Ok(cancelled)
            }
            None => {
                let current = self.reload(id).await?;
                Err(invalid(current.status).into())
            }
        }
    }

    pub async fn list(
        &self,
        user_id: DbId,
        query: &TaskListQuery,
    ) -> Result<Vec<GenerationTask>, GenerationError> {
        Ok(self.store.list_by_user(user_id, query).await?)
    }

    pub async fn stats(&self, user_id: DbId) -> Result<TaskStats, GenerationError> {
        Ok(self.store.stats_by_user(user_id).await?)
    }

    /// Images of a task visible to `requester`.
    pub async fn images(&self, id: TaskId, requester: Requester) -> Result<Vec<Image>, GenerationError> {
        self.get_task(id, requester).await?;
        Ok(self.store.images_for_task(id).await?)
    }

    pub fn models(&self) -> Vec<ProviderCatalog> {
        self.orchestrator.registry().catalog()
    }
}

fn params_json(params: &GenerationParams) -> Result<serde_json::Value, CoreError> {
    serde_json::to_value(params).map_err(|e| CoreError::Internal(format!("encode params: {e}")))
}
