//! Replicate client: predictions are created asynchronously and then
//! either polled to completion or reported back through a webhook.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::catalog::ModelSpec;
use crate::client::{
    ExternalStatus, GenerationOutput, GenerationRequest, PreparedRequest, ProviderClient,
    Submission,
};
use crate::config::ProviderSettings;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::http::{self, send_with_retry};

/// Interval between prediction status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Floor for time estimates, in seconds.
const MIN_ESTIMATE_SECS: f64 = 10.0;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A Replicate prediction, as returned by the API and posted to webhooks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Prediction {
    pub id: String,
    pub status: String,
    /// A single URL or a list of URLs, depending on the model.
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub logs: Option<String>,
    #[serde(default)]
    pub metrics: Option<Value>,
}

impl Prediction {
    pub fn external_status(&self) -> ExternalStatus {
        ExternalStatus::parse(&self.status)
    }

    /// Output URLs in order. Non-string entries are skipped.
    pub fn output_urls(&self) -> Vec<String> {
        match &self.output {
            Some(Value::String(url)) if !url.is_empty() => vec![url.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    /// Server-side prediction time in seconds, if reported.
    pub fn predict_time(&self) -> Option<f64> {
        self.metrics
            .as_ref()
            .and_then(|m| m.get("predict_time"))
            .and_then(Value::as_f64)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ReplicateClient {
    settings: ProviderSettings,
    http: reqwest::Client,
    poll_interval: Duration,
}

impl ReplicateClient {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProviderError::from_reqwest(&settings.name, &e))?;
        Ok(Self {
            settings,
            http,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override the polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn token(&self) -> Result<&str, ProviderError> {
        self.settings
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::not_configured(&self.settings.name))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.settings.base_url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        builder.header(reqwest::header::AUTHORIZATION, format!("Token {token}"))
    }

    /// Model-specific `input` object.
    fn build_input(prepared: &PreparedRequest) -> Value {
        let p = &prepared.params;
        let mut input = json!({
            "prompt": prepared.prompt,
            "width": p.width,
            "height": p.height,
            "num_outputs": p.batch_size,
            "num_inference_steps": p.steps,
            "guidance_scale": p.guidance_scale,
        });
        if let Some(seed) = p.seed {
            input["seed"] = json!(seed);
        }
        if let Some(negative) = &prepared.negative_prompt {
            input["negative_prompt"] = json!(negative);
        }
        if prepared.model.id == "replicate-sdxl" {
            input["scheduler"] = json!("DPMSolverMultistep");
        }
        input
    }

    /// Create a prediction. Official models (`owner/name` handles) are
    /// addressed by path, community models by version hash.
    async fn create_prediction(
        &self,
        prepared: &PreparedRequest,
        webhook_url: Option<&str>,
    ) -> Result<Prediction, ProviderError> {
        let token = self.token()?;
        let handle = &prepared.model.handle;

        let (url, mut body) = if handle.contains('/') {
            (
                self.url(&format!("/models/{handle}/predictions")),
                json!({ "input": Self::build_input(prepared) }),
            )
        } else {
            (
                self.url("/predictions"),
                json!({ "version": handle, "input": Self::build_input(prepared) }),
            )
        };
        if let Some(webhook) = webhook_url {
            body["webhook"] = json!(webhook);
            body["webhook_events_filter"] = json!(["completed"]);
        }

        tracing::debug!(
            provider = self.name(),
            model = %prepared.model.id,
            webhook = webhook_url.is_some(),
            "Creating prediction",
        );

        let response = send_with_retry(self.name(), &self.settings.retry, || {
            self.authorized(self.http.post(&url), token).json(&body)
        })
        .await?;
        http::parse_json(self.name(), response).await
    }

    /// Fetch the current state of a prediction.
    pub async fn get_prediction(&self, id: &str) -> Result<Prediction, ProviderError> {
        let token = self.token()?;
        let url = self.url(&format!("/predictions/{id}"));
        let response = send_with_retry(self.name(), &self.settings.retry, || {
            self.authorized(self.http.get(&url), token)
        })
        .await?;
        http::parse_json(self.name(), response).await
    }

    /// Poll until the prediction reaches a final status or `max_wait`
    /// elapses.
    async fn wait_for_completion(
        &self,
        mut prediction: Prediction,
        max_wait: Duration,
    ) -> Result<Prediction, ProviderError> {
        let deadline = Instant::now() + max_wait;
        loop {
            match prediction.external_status() {
                ExternalStatus::Succeeded => return Ok(prediction),
                ExternalStatus::Failed => {
                    let message = prediction
                        .error_message()
                        .unwrap_or_else(|| "prediction failed".into());
                    return Err(ProviderError::new(self.name(), ProviderErrorKind::Api, message));
                }
                ExternalStatus::Canceled => {
                    return Err(ProviderError::new(
                        self.name(),
                        ProviderErrorKind::Api,
                        "prediction was canceled",
                    ));
                }
                ExternalStatus::InProgress => {}
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(ProviderError::new(
                    self.name(),
                    ProviderErrorKind::Timeout,
                    format!(
                        "prediction {} did not finish within {}s",
                        prediction.id,
                        max_wait.as_secs()
                    ),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
            prediction = self.get_prediction(&prediction.id).await?;
        }
    }
}

#[async_trait]
impl ProviderClient for ReplicateClient {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn models(&self) -> &[ModelSpec] {
        &self.settings.models
    }

    fn estimate_time(&self, request: &PreparedRequest) -> f64 {
        let p = &request.params;
        let pixels = f64::from(p.width) * f64::from(p.height) / (1024.0 * 1024.0);
        let steps = f64::from(p.steps) / 25.0;
        let estimate = request.model.estimated_time_secs * pixels * steps * f64::from(p.batch_size);
        estimate.max(MIN_ESTIMATE_SECS)
    }

    fn supports_webhooks(&self) -> bool {
        true
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, ProviderError> {
        let prepared = self.prepare(request);
        let started = Instant::now();

        let created = self.create_prediction(&prepared, None).await?;
        let external_id = created.id.clone();
        let finished = self
            .wait_for_completion(created, prepared.model.max_wait)
            .await?;

        let images = finished.output_urls();
        if images.is_empty() {
            return Err(ProviderError::new(
                self.name(),
                ProviderErrorKind::EmptyResult,
                "prediction succeeded without output",
            ));
        }

        tracing::debug!(
            provider = self.name(),
            prediction_id = %external_id,
            predict_time = ?finished.predict_time(),
            images = images.len(),
            "Prediction succeeded",
        );

        Ok(GenerationOutput {
            images,
            provider: self.name().to_string(),
            model: prepared.model.id.clone(),
            params: prepared.params,
            generation_time: started.elapsed(),
            external_id: Some(external_id),
        })
    }

    async fn submit_with_webhook(
        &self,
        request: &GenerationRequest,
        webhook_url: &str,
    ) -> Result<Submission, ProviderError> {
        let prepared = self.prepare(request);
        let created = self.create_prediction(&prepared, Some(webhook_url)).await?;
        Ok(Submission {
            provider: self.name().to_string(),
            model: prepared.model.id.clone(),
            params: prepared.params,
            external_id: created.id,
        })
    }

    async fn cancel(&self, external_id: &str) -> Result<(), ProviderError> {
        let token = self.token()?;
        let url = self.url(&format!("/predictions/{external_id}/cancel"));
        let response = send_with_retry(self.name(), &self.settings.retry, || {
            self.authorized(self.http.post(&url), token)
        })
        .await?;
        http::ensure_success(self.name(), response).await?;
        Ok(())
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let token = self.token()?;
        let url = self.url("/account");
        let response = send_with_retry(self.name(), &self.settings.retry, || {
            self.authorized(self.http.get(&url), token)
        })
        .await?;
        http::ensure_success(self.name(), response).await?;
        Ok(())
    }
}
