//! Clients for external image-generation providers, plus the health
//! tracking and failover logic that routes requests between them.
//!
//! - [`client`]: the [`ProviderClient`] trait and normalized request/response types.
//! - [`siliconflow`]: synchronous provider (one POST returns image URLs).
//! - [`replicate`]: asynchronous provider (predictions, polled or webhook-completed).
//! - [`health`]: per-provider counters and eligibility.
//! - [`registry`]: name and model lookup built once at startup.
//! - [`orchestrator`]: provider selection and single failover.
//! - [`testing`]: scripted provider for tests.

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod orchestrator;
pub mod registry;
pub mod replicate;
pub mod siliconflow;
pub mod testing;

pub use client::{GenerationOutput, GenerationRequest, ProviderClient, Submission};
pub use error::{ProviderError, ProviderErrorKind};
pub use health::HealthTracker;
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use registry::ProviderRegistry;
