//! Static provider configuration loaded at process start.

use std::time::Duration;

use crate::catalog::{self, ModelSpec};
use crate::http::RetryPolicy;

pub const SILICONFLOW: &str = "siliconflow";
pub const REPLICATE: &str = "replicate";

/// Consecutive failures after which a provider is marked unhealthy.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

/// Settings for one provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub name: String,
    pub enabled: bool,
    /// Lower is preferred.
    pub priority: u32,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// The first model is the provider default.
    pub models: Vec<ModelSpec>,
}

impl ProviderSettings {
    /// Build settings for `name` from `{NAME}_*` environment variables.
    fn from_env(
        name: &str,
        key_var: &str,
        default_base_url: &str,
        default_priority: u32,
        default_timeout_secs: u64,
        models: Vec<ModelSpec>,
    ) -> Self {
        let prefix = name.to_uppercase();
        let var = |suffix: &str| std::env::var(format!("{prefix}_{suffix}")).ok();

        let api_key = std::env::var(key_var).ok().filter(|k| !k.trim().is_empty());

        let base_url = var("BASE_URL")
            .unwrap_or_else(|| default_base_url.into())
            .trim_end_matches('/')
            .to_string();

        let priority: u32 = var("PRIORITY")
            .map(|v| v.parse().expect("provider PRIORITY must be a valid u32"))
            .unwrap_or(default_priority);

        let enabled = var("ENABLED")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);

        let timeout_secs: u64 = var("TIMEOUT_SECS")
            .map(|v| v.parse().expect("provider TIMEOUT_SECS must be a valid u64"))
            .unwrap_or(default_timeout_secs);

        Self {
            name: name.into(),
            enabled,
            priority,
            base_url,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
            retry: RetryPolicy::default(),
            models,
        }
    }
}

/// All configured providers plus health-tracking knobs.
#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub siliconflow: ProviderSettings,
    pub replicate: ProviderSettings,
    pub error_threshold: u32,
}

impl ProvidersConfig {
    /// Load provider configuration from environment variables.
    ///
    /// | Env Var                     | Default                          |
    /// |-----------------------------|----------------------------------|
    /// | `SILICONFLOW_API_KEY`       | unset (provider unconfigured)    |
    /// | `SILICONFLOW_BASE_URL`      | `https://api.siliconflow.cn/v1`  |
    /// | `SILICONFLOW_PRIORITY`      | `2`                              |
    /// | `SILICONFLOW_ENABLED`       | `true`                           |
    /// | `SILICONFLOW_TIMEOUT_SECS`  | `120`                            |
    /// | `REPLICATE_API_TOKEN`       | unset (provider unconfigured)    |
    /// | `REPLICATE_BASE_URL`        | `https://api.replicate.com/v1`   |
    /// | `REPLICATE_PRIORITY`        | `1`                              |
    /// | `REPLICATE_ENABLED`         | `true`                           |
    /// | `REPLICATE_TIMEOUT_SECS`    | `60`                             |
    /// | `HEALTH_ERROR_THRESHOLD`    | `5`                              |
    pub fn from_env() -> Self {
        let siliconflow = ProviderSettings::from_env(
            SILICONFLOW,
            "SILICONFLOW_API_KEY",
            "https://api.siliconflow.cn/v1",
            2,
            120,
            catalog::siliconflow_models(),
        );
        let replicate = ProviderSettings::from_env(
            REPLICATE,
            "REPLICATE_API_TOKEN",
            "https://api.replicate.com/v1",
            1,
            60,
            catalog::replicate_models(),
        );
        let error_threshold: u32 = std::env::var("HEALTH_ERROR_THRESHOLD")
            .unwrap_or_else(|_| DEFAULT_ERROR_THRESHOLD.to_string())
            .parse()
            .expect("HEALTH_ERROR_THRESHOLD must be a valid u32");

        Self {
            siliconflow,
            replicate,
            error_threshold,
        }
    }
}
