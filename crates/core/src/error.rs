use crate::quota::QuotaScope;
use crate::task_status::TaskStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The fixed request window for this user is exhausted.
    #[error("Rate limit exceeded: {limit} requests per {window_secs}s")]
    RateLimitExceeded { limit: u32, window_secs: u64 },

    /// The user's daily generation quota for `scope` is spent.
    #[error("Daily quota exceeded: {cap} generations per day ({scope})")]
    QuotaExceeded { cap: i64, scope: QuotaScope },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Internal error: {0}")]
    Internal(String),
}
