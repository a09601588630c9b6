//! SiliconFlow client: a single synchronous `POST /images/generations`
//! returns image URLs.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::ModelSpec;
use crate::client::{GenerationOutput, GenerationRequest, PreparedRequest, ProviderClient};
use crate::config::ProviderSettings;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::http::{self, send_with_retry};

/// Floor for time estimates, in seconds.
const MIN_ESTIMATE_SECS: f64 = 5.0;

#[derive(Debug, Serialize)]
struct ImagesRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    width: i32,
    height: i32,
    num_inference_steps: i32,
    guidance_scale: f64,
    num_images_per_prompt: i32,
    response_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ImageUrl {
    url: String,
}

/// Response shape. Older API versions use `data`, newer ones `images`.
#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    images: Vec<ImageUrl>,
    #[serde(default)]
    data: Vec<ImageUrl>,
}

impl ImagesResponse {
    fn into_urls(self) -> Vec<String> {
        self.images
            .into_iter()
            .chain(self.data)
            .map(|i| i.url)
            .filter(|u| !u.is_empty())
            .collect()
    }
}

pub struct SiliconFlowClient {
    settings: ProviderSettings,
    http: reqwest::Client,
}

impl SiliconFlowClient {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProviderError::from_reqwest(&settings.name, &e))?;
        Ok(Self { settings, http })
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.settings
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::not_configured(&self.settings.name))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.settings.base_url)
    }
}

/// Relative cost of a model family compared to SD 2.x.
fn model_factor(model: &ModelSpec) -> f64 {
    let id = model.id.to_ascii_lowercase();
    if id.contains("flux") {
        2.0
    } else if id.contains("xl") {
        1.5
    } else {
        1.0
    }
}

#[async_trait]
impl ProviderClient for SiliconFlowClient {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn models(&self) -> &[ModelSpec] {
        &self.settings.models
    }

    fn estimate_time(&self, request: &PreparedRequest) -> f64 {
        let p = &request.params;
        let pixels = f64::from(p.width) * f64::from(p.height) / (512.0 * 512.0);
        let steps = f64::from(p.steps) / 20.0;
        let estimate = 10.0 * pixels * steps * f64::from(p.batch_size) * model_factor(&request.model);
        estimate.max(MIN_ESTIMATE_SECS)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, ProviderError> {
        let api_key = self.api_key()?;
        let prepared = self.prepare(request);
        let body = ImagesRequest {
            model: &prepared.model.handle,
            prompt: &prepared.prompt,
            negative_prompt: prepared.negative_prompt.as_deref(),
            width: prepared.params.width,
            height: prepared.params.height,
            num_inference_steps: prepared.params.steps,
            guidance_scale: prepared.params.guidance_scale,
            num_images_per_prompt: prepared.params.batch_size,
            response_format: "url",
            seed: prepared.params.seed,
        };

        tracing::debug!(
            provider = self.name(),
            model = %prepared.model.id,
            width = body.width,
            height = body.height,
            steps = body.num_inference_steps,
            "Submitting generation",
        );

        let started = Instant::now();
        let url = self.url("/images/generations");
        let response = send_with_retry(self.name(), &self.settings.retry, || {
            self.http.post(&url).bearer_auth(api_key).json(&body)
        })
        .await?;
        let parsed: ImagesResponse = http::parse_json(self.name(), response).await?;
        let images = parsed.into_urls();

        if images.is_empty() {
            return Err(ProviderError::new(
                self.name(),
                ProviderErrorKind::EmptyResult,
                "no images returned",
            ));
        }

        Ok(GenerationOutput {
            images,
            provider: self.name().to_string(),
            model: prepared.model.id.clone(),
            params: prepared.params,
            generation_time: started.elapsed(),
            external_id: None,
        })
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let api_key = self.api_key()?;
        let url = self.url("/models");
        let response = send_with_retry(self.name(), &self.settings.retry, || {
            self.http.get(&url).bearer_auth(api_key)
        })
        .await?;
        http::ensure_success(self.name(), response).await?;
        Ok(())
    }
}
