//! Normalized provider failures.

use serde::Serialize;

/// Broad failure category, used for retry and failover decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Per-request timeout, or an asynchronous job exceeded its max wait.
    Timeout,
    /// Connection, DNS or TLS failure.
    Network,
    /// HTTP 429 from the provider.
    RateLimited,
    /// Any other non-2xx response, or a failed/cancelled remote job.
    Api,
    /// The provider reported success but returned no images.
    EmptyResult,
    /// The response body did not match the expected shape.
    InvalidResponse,
    /// Credentials are missing; no request was made.
    NotConfigured,
    /// The operation is not offered by this provider.
    Unsupported,
}

impl ProviderErrorKind {
    /// Whether the HTTP layer should retry the request.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ProviderErrorKind::Timeout | ProviderErrorKind::Network | ProviderErrorKind::RateLimited
        )
    }
}

/// A failed provider call, carrying the provider's own message and code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{provider} generation failed: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
    pub error_code: Option<String>,
}

impl ProviderError {
    pub fn new(provider: &str, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            kind,
            message: message.into(),
            status_code: None,
            error_code: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.error_code = code;
        self
    }

    pub fn not_configured(provider: &str) -> Self {
        Self::new(
            provider,
            ProviderErrorKind::NotConfigured,
            "API credentials are not configured",
        )
    }

    /// Classify a transport-level [`reqwest::Error`].
    pub fn from_reqwest(provider: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else if err.is_decode() {
            ProviderErrorKind::InvalidResponse
        } else {
            ProviderErrorKind::Network
        };
        let mut error = Self::new(provider, kind, err.to_string());
        error.status_code = err.status().map(|s| s.as_u16());
        error
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
