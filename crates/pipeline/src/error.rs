use imagegen_core::error::CoreError;
use imagegen_db::StoreError;

/// Errors returned by [`crate::GenerationService`].
///
/// Provider failures never appear here: they end up on the task as a
/// `failed` status.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
