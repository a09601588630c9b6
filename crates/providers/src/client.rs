//! The provider capability interface and its normalized request and
//! response types.

use std::time::Duration;

use async_trait::async_trait;
use imagegen_core::generation::{clamp_params, GenerationParams};
use serde::Serialize;

use crate::catalog::ModelSpec;
use crate::error::{ProviderError, ProviderErrorKind};

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// A provider-agnostic generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    /// Requested model id. Providers that do not serve it use their default.
    pub model: Option<String>,
    pub params: GenerationParams,
}

/// A request resolved against one model: parameters clamped into the
/// model's range and unsupported fields dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub model: ModelSpec,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub params: GenerationParams,
}

impl PreparedRequest {
    pub fn new(model: &ModelSpec, request: &GenerationRequest) -> Self {
        let negative_prompt = if model.supports_negative_prompt {
            request.negative_prompt.clone()
        } else {
            None
        };
        Self {
            model: model.clone(),
            prompt: request.prompt.clone(),
            negative_prompt,
            params: clamp_params(&request.params, &model.bounds()),
        }
    }
}

/// A finished generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOutput {
    /// Image URLs, never empty.
    pub images: Vec<String>,
    pub provider: String,
    pub model: String,
    /// Parameters actually sent, after clamping.
    pub params: GenerationParams,
    #[serde(serialize_with = "serialize_secs")]
    pub generation_time: Duration,
    /// Provider-side job handle, for asynchronous providers.
    pub external_id: Option<String>,
}

/// An asynchronous job accepted by a provider that will call back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub provider: String,
    pub model: String,
    pub params: GenerationParams,
    pub external_id: String,
}

/// Normalized status of a provider-side job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalStatus {
    /// Queued or running.
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl ExternalStatus {
    /// Map a provider status string. Unknown values count as in progress.
    pub fn parse(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "succeeded" | "success" | "completed" => ExternalStatus::Succeeded,
            "failed" | "error" => ExternalStatus::Failed,
            "canceled" | "cancelled" => ExternalStatus::Canceled,
            _ => ExternalStatus::InProgress,
        }
    }

    pub fn is_final(self) -> bool {
        !matches!(self, ExternalStatus::InProgress)
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One external image-generation service.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Stable provider name, also the quota family.
    fn name(&self) -> &str;

    fn models(&self) -> &[ModelSpec];

    /// Look up a served model by id.
    fn model(&self, id: &str) -> Option<&ModelSpec> {
        self.models().iter().find(|m| m.id == id)
    }

    /// Resolve a requested model id, falling back to the default model.
    fn resolve_model(&self, requested: Option<&str>) -> &ModelSpec {
        requested
            .and_then(|id| self.model(id))
            .unwrap_or_else(|| &self.models()[0])
    }

    /// Clamp and trim a request for the model this provider would use.
    fn prepare(&self, request: &GenerationRequest) -> PreparedRequest {
        PreparedRequest::new(self.resolve_model(request.model.as_deref()), request)
    }

    /// Estimated wall-clock seconds for a prepared request.
    fn estimate_time(&self, request: &PreparedRequest) -> f64;

    /// Whether [`ProviderClient::submit_with_webhook`] is offered.
    fn supports_webhooks(&self) -> bool {
        false
    }

    /// Generate and wait for the images (polling if the provider is
    /// asynchronous).
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, ProviderError>;

    /// Start a job that will report completion to `webhook_url`.
    async fn submit_with_webhook(
        &self,
        _request: &GenerationRequest,
        _webhook_url: &str,
    ) -> Result<Submission, ProviderError> {
        Err(ProviderError::new(
            self.name(),
            ProviderErrorKind::Unsupported,
            "webhook submission is not supported",
        ))
    }

    /// Cancel a provider-side job.
    async fn cancel(&self, _external_id: &str) -> Result<(), ProviderError> {
        Err(ProviderError::new(
            self.name(),
            ProviderErrorKind::Unsupported,
            "cancellation is not supported",
        ))
    }

    /// Cheap authenticated request used by the health tracker.
    async fn probe(&self) -> Result<(), ProviderError>;
}

impl std::fmt::Debug for dyn ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient").field("name", &self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{replicate_models, siliconflow_models};

    fn request(width: i32, negative: Option<&str>) -> GenerationRequest {
        GenerationRequest {
            prompt: "castle".into(),
            negative_prompt: negative.map(Into::into),
            model: None,
            params: GenerationParams {
                width,
                ..Default::default()
            },
        }
    }

    #[test]
    fn prepare_clamps_width_to_min() {
        let model = &siliconflow_models()[0];
        let prepared = PreparedRequest::new(model, &request(100, None));
        assert_eq!(prepared.params.width, 256);
    }

    #[test]
    fn prepare_drops_unsupported_negative_prompt() {
        let flux = &replicate_models()[0];
        assert!(!flux.supports_negative_prompt);
        let prepared = PreparedRequest::new(flux, &request(1024, Some("blurry")));
        assert_eq!(prepared.negative_prompt, None);
        assert_eq!(prepared.params.steps, 4);

        let sdxl = &siliconflow_models()[0];
        let prepared = PreparedRequest::new(sdxl, &request(1024, Some("blurry")));
        assert_eq!(prepared.negative_prompt.as_deref(), Some("blurry"));
    }

    #[test]
    fn external_status_mapping() {
        assert_eq!(ExternalStatus::parse("succeeded"), ExternalStatus::Succeeded);
        assert_eq!(ExternalStatus::parse("failed"), ExternalStatus::Failed);
        assert_eq!(ExternalStatus::parse("canceled"), ExternalStatus::Canceled);
        assert_eq!(ExternalStatus::parse("starting"), ExternalStatus::InProgress);
        assert_eq!(ExternalStatus::parse("processing"), ExternalStatus::InProgress);
        assert!(!ExternalStatus::InProgress.is_final());
    }
}
