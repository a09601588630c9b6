#![allow(dead_code)]

use std::time::Duration;

use imagegen_core::generation::GenerationParams;
use imagegen_providers::catalog::ModelSpec;
use imagegen_providers::client::GenerationRequest;
use imagegen_providers::config::ProviderSettings;
use imagegen_providers::http::RetryPolicy;

/// Retry policy with millisecond delays so retry tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

pub fn settings(name: &str, base_url: &str, models: Vec<ModelSpec>) -> ProviderSettings {
    ProviderSettings {
        name: name.into(),
        enabled: true,
        priority: 1,
        base_url: base_url.into(),
        api_key: Some("test-key".into()),
        timeout: Duration::from_secs(5),
        retry: fast_retry(),
        models,
    }
}

pub fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest {
        prompt: prompt.into(),
        negative_prompt: None,
        model: None,
        params: GenerationParams::default(),
    }
}
