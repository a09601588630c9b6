use std::sync::Arc;

use imagegen_pipeline::GenerationService;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything inside is behind an `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Task lifecycle, admission control and provider routing.
    pub generation: GenerationService,
}
