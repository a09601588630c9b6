//! Generation pipeline: admission control, task lifecycle and the
//! supervised background executor.
//!
//! - [`quota`]: per-user rate windows and daily caps.
//! - [`lifecycle`]: [`GenerationService`], which owns every task status change.
//! - [`supervisor`]: tracked background work, drained on shutdown.

pub mod error;
pub mod lifecycle;
pub mod quota;
pub mod supervisor;

pub use error::GenerationError;
pub use lifecycle::{GenerationService, Requester, SubmitOutcome, SubmitRequest, WebhookEvent};
pub use quota::{InMemoryRateLimitStore, QuotaGate, RateLimitStore};
pub use supervisor::Supervisor;
