//! API error types.

use thiserror::Error;

/// API error type.
#[derive(Error, Debug)]
pub enum ApiError {
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the backend
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The backend reported a failure in the response body
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Invalid base URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type alias using ApiError.
pub type ApiResult<T> = Result<T, ApiError>;
