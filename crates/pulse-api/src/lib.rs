//! Request client for the Pulse backend REST endpoints.
//!
//! This crate is the seam between the sync core and the backend's
//! request/response API:
//! - [`ApiClient`]: the trait consumed by the mutation coordinator and the
//!   view aggregator
//! - [`HttpApiClient`]: the reqwest-backed production implementation
//! - [`RecordingApi`]: an in-memory implementation that records calls and
//!   serves scripted outcomes, for tests

mod client;
mod error;
mod recording;
mod types;

pub use client::{ApiClient, HttpApiClient, HttpApiConfig};
pub use error::{ApiError, ApiResult};
pub use recording::{ApiCall, RecordingApi};
pub use types::{CommentCreateResponse, CommentDeleteResponse, FollowResponse, LikeResponse};
