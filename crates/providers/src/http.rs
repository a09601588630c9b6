//! Shared HTTP plumbing for provider clients: bounded retries with
//! exponential backoff, and error-body normalization.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{ProviderError, ProviderErrorKind};

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Backoff parameters for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry. Doubles on each further retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// clamped to [`RetryPolicy::max_delay`].
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

/// Send a request, retrying timeouts, network errors and HTTP 429.
///
/// `build` is called once per attempt because a [`reqwest::RequestBuilder`]
/// cannot be reused. Non-429 responses are returned as-is, success or not;
/// pass them through [`ensure_success`].
pub async fn send_with_retry<F>(
    provider: &str,
    policy: &RetryPolicy,
    build: F,
) -> Result<reqwest::Response, ProviderError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0u32;
    loop {
        let error = match build().send().await {
            Ok(response) if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                error_from_response(provider, response).await
            }
            Ok(response) => return Ok(response),
            Err(e) => ProviderError::from_reqwest(provider, &e),
        };

        if !error.is_retryable() || attempt >= policy.max_retries {
            return Err(error);
        }

        let delay = policy.delay_for(attempt);
        tracing::warn!(
            provider,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %error.message,
            "Retrying provider request",
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Return the response unchanged on 2xx, or a normalized error.
pub async fn ensure_success(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(error_from_response(provider, response).await)
    }
}

/// Parse a successful JSON body into `T`.
pub async fn parse_json<T: DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let response = ensure_success(provider, response).await?;
    response.json::<T>().await.map_err(|e| {
        ProviderError::new(
            provider,
            ProviderErrorKind::InvalidResponse,
            format!("Unexpected response body: {e}"),
        )
    })
}

/// Build a [`ProviderError`] from a non-2xx response, surfacing the
/// provider's own message and code when the body is JSON.
async fn error_from_response(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    let (message, code) = extract_error(&body);

    let kind = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ProviderErrorKind::RateLimited
    } else if status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::GATEWAY_TIMEOUT
    {
        ProviderErrorKind::Timeout
    } else {
        ProviderErrorKind::Api
    };

    let message = message.unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), truncate(&body)));
    ProviderError::new(provider, kind, message)
        .with_status(status.as_u16())
        .with_code(code)
}

/// Pull a message and code out of the error body shapes providers use:
/// `{"error": {"message", "code"}}`, `{"error": "..."}`, `{"detail": "..."}`
/// and `{"message": "...", "code": ...}`.
pub fn extract_error(body: &str) -> (Option<String>, Option<String>) {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, None);
    };

    let as_text = |v: &serde_json::Value| match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    };

    if let Some(error) = json.get("error").filter(|e| e.is_object()) {
        let message = error.get("message").and_then(as_text);
        let code = error.get("code").and_then(as_text);
        return (message, code);
    }

    let message = ["error", "detail", "message", "title"]
        .iter()
        .find_map(|key| json.get(*key).and_then(as_text));
    let code = json.get("code").and_then(as_text);
    (message, code)
}

fn truncate(body: &str) -> String {
    const MAX: usize = 300;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn delay_clamps_at_max() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn extracts_nested_error_object() {
        let (msg, code) = extract_error(r#"{"error":{"message":"quota","code":20015}}"#);
        assert_eq!(msg.as_deref(), Some("quota"));
        assert_eq!(code.as_deref(), Some("20015"));
    }

    #[test]
    fn extracts_detail_field() {
        let (msg, code) = extract_error(r#"{"detail":"Invalid version","status":422}"#);
        assert_eq!(msg.as_deref(), Some("Invalid version"));
        assert_eq!(code, None);
    }

    #[test]
    fn extracts_flat_message_and_code() {
        let (msg, code) = extract_error(r#"{"message":"bad size","code":"invalid"}"#);
        assert_eq!(msg.as_deref(), Some("bad size"));
        assert_eq!(code.as_deref(), Some("invalid"));
    }

    #[test]
    fn non_json_body_yields_nothing() {
        assert_eq!(extract_error("<html>502</html>"), (None, None));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        assert!(truncate(&body).len() < 400);
    }
}
