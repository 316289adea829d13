//! Mutation error types.

use pulse_api::ApiError;
use pulse_cache::CacheError;
use thiserror::Error;

/// Mutation error type. By the time one of these surfaces, the optimistic
/// patch has already been rolled back.
#[derive(Error, Debug)]
pub enum MutationError {
    /// The backend rejected or failed the request
    #[error("request failed: {0}")]
    Api(#[from] ApiError),

    /// The target entity is not in the cache
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Result type alias using MutationError.
pub type MutationResult<T> = Result<T, MutationError>;
