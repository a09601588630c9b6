use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// Provider settings are loaded separately by
/// [`imagegen_providers::config::ProvidersConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds. Inline generations poll providers
    /// inside the request, so this must exceed the longest model wait.
    pub request_timeout_secs: u64,
    /// How long shutdown waits for background generations.
    pub shutdown_timeout_secs: u64,
    /// JWT validation settings.
    pub jwt: JwtConfig,
    /// Externally reachable base URL, used to build webhook callbacks.
    pub public_base_url: String,
    /// HMAC secret for inbound webhooks, e.g. Replicate's `whsec_...` signing
    /// secret. Signatures are not checked when unset.
    pub webhook_secret: Option<String>,
    /// Interval between provider probe rounds.
    pub health_check_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                 |
    /// |------------------------------|-------------------------|
    /// | `HOST`                       | `0.0.0.0`               |
    /// | `PORT`                       | `3000`                  |
    /// | `CORS_ORIGINS`               | `http://localhost:3000` |
    /// | `REQUEST_TIMEOUT_SECS`       | `330`                   |
    /// | `SHUTDOWN_TIMEOUT_SECS`      | `30`                    |
    /// | `PUBLIC_BASE_URL`            | `http://localhost:3000` |
    /// | `WEBHOOK_SECRET`             | unset                   |
    /// | `HEALTH_CHECK_INTERVAL_SECS` | `300`                   |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "330".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .trim_end_matches('/')
            .to_string();

        let webhook_secret = std::env::var("WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let health_check_interval_secs: u64 = std::env::var("HEALTH_CHECK_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("HEALTH_CHECK_INTERVAL_SECS must be a valid u64");

        let jwt = JwtConfig::from_env();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt,
            public_base_url,
            webhook_secret,
            health_check_interval_secs,
        }
    }
}
