//! Provider selection and single-step failover.
//!
//! Selection is priority-first: an eligible preferred provider wins,
//! otherwise the eligible provider with the lowest (priority, latency).
//! When the chosen provider fails and the caller did not pin it, one
//! alternate is picked at random among the remaining eligible providers.
//! Every attempt's outcome feeds the [`HealthTracker`].

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use imagegen_core::types::TaskId;
use imagegen_core::webhook::callback_url;
use rand::seq::IndexedRandom;

use crate::client::{GenerationOutput, GenerationRequest, PreparedRequest, ProviderClient, Submission};
use crate::error::{ProviderError, ProviderErrorKind};
use crate::health::{HealthResult, HealthTracker, Outcome};
use crate::registry::ProviderRegistry;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("No AI provider is currently available")]
    NoProviderAvailable,

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{primary}; failover also failed: {fallback}")]
    FailoverExhausted {
        primary: ProviderError,
        fallback: ProviderError,
    },
}

impl OrchestratorError {
    /// Errors caused by the request itself rather than by providers.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            OrchestratorError::UnknownProvider(_) | OrchestratorError::UnknownModel(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Routing types
// ---------------------------------------------------------------------------

/// Where a request should go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Route {
    /// Provider to try first.
    pub preferred: Option<String>,
    /// The caller named the provider explicitly; no failover.
    pub pinned: bool,
}

/// How a provider attempt should complete.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchMode {
    /// Wait for images (polling asynchronous providers).
    Inline,
    /// Let webhook-capable providers call back for `task_id`; others run
    /// inline.
    Webhook {
        public_base_url: String,
        task_id: TaskId,
    },
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Finished(GenerationOutput),
    Submitted(Submission),
}

/// The provider chosen for a request and the request as it will be sent.
#[derive(Clone)]
pub struct Dispatch {
    pub client: Arc<dyn ProviderClient>,
    pub prepared: PreparedRequest,
}

impl Dispatch {
    pub fn provider(&self) -> &str {
        self.client.name()
    }

    pub fn model_id(&self) -> &str {
        &self.prepared.model.id
    }

    pub fn estimated_time(&self) -> f64 {
        self.client.estimate_time(&self.prepared)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, health: Arc<HealthTracker>) -> Self {
        Self { registry, health }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Turn an explicit provider and/or model into a [`Route`].
    ///
    /// An explicit provider pins the route. A model alone makes its owner
    /// the preferred provider without pinning.
    pub fn route(&self, provider: Option<&str>, model: Option<&str>) -> Result<Route, OrchestratorError> {
        match (provider, model) {
            (Some(name), model) => {
                let client = self
                    .registry
                    .get(name)
                    .ok_or_else(|| OrchestratorError::UnknownProvider(name.to_string()))?;
                if let Some(model) = model {
                    if client.model(model).is_none() {
                        return Err(OrchestratorError::UnknownModel(format!(
                            "{model} (not offered by {name})"
                        )));
                    }
                }
                Ok(Route {
                    preferred: Some(name.to_string()),
                    pinned: true,
                })
            }
            (None, Some(model)) => {
                let owner = self
                    .registry
                    .owner_of(model)
                    .ok_or_else(|| OrchestratorError::UnknownModel(model.to_string()))?;
                Ok(Route {
                    preferred: Some(owner.name().to_string()),
                    pinned: false,
                })
            }
            (None, None) => Ok(Route::default()),
        }
    }

    /// Pick the provider to call first.
    pub fn select(&self, preferred: Option<&str>) -> Result<Arc<dyn ProviderClient>, OrchestratorError> {
        if let Some(name) = preferred {
            if self.health.is_healthy(name) {
                if let Some(client) = self.registry.get(name) {
                    return Ok(Arc::clone(client));
                }
            }
            tracing::debug!(provider = name, "Preferred provider unavailable, ranking others");
        }

        self.health
            .healthy_providers()
            .iter()
            .find_map(|r| self.registry.get(&r.name))
            .cloned()
            .ok_or(OrchestratorError::NoProviderAvailable)
    }

    /// Select a provider for `route` and prepare the request for it.
    pub fn plan(&self, request: &GenerationRequest, route: &Route) -> Result<Dispatch, OrchestratorError> {
        let client = self.select(route.preferred.as_deref())?;
        let prepared = client.prepare(request);
        Ok(Dispatch { client, prepared })
    }

    /// Run a planned dispatch, failing over once when allowed.
    pub async fn execute(
        &self,
        dispatch: &Dispatch,
        request: &GenerationRequest,
        route: &Route,
        mode: &DispatchMode,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let primary = &dispatch.client;
        let primary_error = match self.attempt(primary.as_ref(), request, mode).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => e,
        };

        if route.pinned {
            return Err(OrchestratorError::Provider(primary_error));
        }

        let Some(alternate) = self.failover_candidate(primary.name()) else {
            tracing::warn!(
                provider = primary.name(),
                error = %primary_error,
                "Provider failed and no alternate is available",
            );
            return Err(OrchestratorError::Provider(primary_error));
        };

        tracing::warn!(
            provider = primary.name(),
            alternate = alternate.name(),
            error = %primary_error,
            "Provider failed, failing over",
        );

        match self.attempt(alternate.as_ref(), request, mode).await {
            Ok(outcome) => Ok(outcome),
            Err(fallback) => Err(OrchestratorError::FailoverExhausted {
                primary: primary_error,
                fallback,
            }),
        }
    }

    /// Generate images, selecting a provider and failing over once.
    pub async fn generate_with_failover(
        &self,
        request: &GenerationRequest,
        route: &Route,
    ) -> Result<GenerationOutput, OrchestratorError> {
        let dispatch = self.plan(request, route)?;
        match self.execute(&dispatch, request, route, &DispatchMode::Inline).await? {
            DispatchOutcome::Finished(output) => Ok(output),
            // Inline attempts never submit.
            DispatchOutcome::Submitted(submission) => Err(ProviderError::new(
                &submission.provider,
                ProviderErrorKind::InvalidResponse,
                "unexpected asynchronous submission",
            )
            .into()),
        }
    }

    /// A random eligible provider other than `exclude`.
    fn failover_candidate(&self, exclude: &str) -> Option<Arc<dyn ProviderClient>> {
        let candidates: Vec<Arc<dyn ProviderClient>> = self
            .health
            .healthy_providers()
            .iter()
            .filter(|r| r.name != exclude)
            .filter_map(|r| self.registry.get(&r.name).cloned())
            .collect();
        candidates.choose(&mut rand::rng()).cloned()
    }

    async fn attempt(
        &self,
        client: &dyn ProviderClient,
        request: &GenerationRequest,
        mode: &DispatchMode,
    ) -> Result<DispatchOutcome, ProviderError> {
        let started = Instant::now();
        let result = match mode {
            DispatchMode::Webhook {
                public_base_url,
                task_id,
            } if client.supports_webhooks() => {
                let url = callback_url(public_base_url, client.name(), *task_id);
                client
                    .submit_with_webhook(request, &url)
                    .await
                    .map(DispatchOutcome::Submitted)
            }
            _ => client.generate(request).await.map(DispatchOutcome::Finished),
        };

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Failure(e.message.clone()),
        };
        self.health
            .record_outcome(client.name(), &outcome, started.elapsed());
        result
    }

    /// Probe every registered provider concurrently.
    pub async fn probe_all(&self) -> Vec<HealthResult> {
        let probes = self
            .registry
            .clients()
            .iter()
            .map(|client| self.health.probe(client.as_ref()));
        join_all(probes).await
    }

    /// Probe a single provider by name.
    pub async fn probe(&self, name: &str) -> Option<HealthResult> {
        let client = self.registry.get(name)?;
        Some(self.health.probe(client.as_ref()).await)
    }

    /// Best-effort cancellation of a provider-side job.
    pub async fn cancel_external(&self, provider: &str, external_id: &str) -> Result<(), OrchestratorError> {
        let client = self
            .registry
            .get(provider)
            .ok_or_else(|| OrchestratorError::UnknownProvider(provider.to_string()))?;
        client.cancel(external_id).await?;
        Ok(())
    }
}
