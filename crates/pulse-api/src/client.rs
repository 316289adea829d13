//! The `ApiClient` trait and its reqwest-backed implementation.

use crate::error::{ApiError, ApiResult};
use crate::types::{CommentCreateResponse, CommentDeleteResponse, FollowResponse, LikeResponse};
use futures_util::future::BoxFuture;
use pulse_cache::{Post, User};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// The request/response endpoints consumed by the mutation coordinator and
/// the view batch aggregator.
///
/// Methods return boxed futures so the trait stays object-safe; callers hold
/// an `Arc<dyn ApiClient>` and spawn settle paths independently of any UI
/// observer lifetime.
pub trait ApiClient: Send + Sync {
    fn like_post(&self, post_id: &str) -> BoxFuture<'_, ApiResult<LikeResponse>>;
    fn unlike_post(&self, post_id: &str) -> BoxFuture<'_, ApiResult<LikeResponse>>;
    fn follow_user(&self, user_id: &str) -> BoxFuture<'_, ApiResult<FollowResponse>>;
    fn unfollow_user(&self, user_id: &str) -> BoxFuture<'_, ApiResult<FollowResponse>>;
    fn create_comment(
        &self,
        post_id: &str,
        body: &str,
    ) -> BoxFuture<'_, ApiResult<CommentCreateResponse>>;
    fn delete_comment(&self, comment_id: &str) -> BoxFuture<'_, ApiResult<CommentDeleteResponse>>;
    /// Report a single content view.
    fn report_view(&self, content_id: &str) -> BoxFuture<'_, ApiResult<()>>;
    /// Report a batch of content views in one write.
    fn report_views_batch(&self, content_ids: &[String]) -> BoxFuture<'_, ApiResult<()>>;
    /// Re-fetch fallback when a mutation response cannot be reconciled.
    fn fetch_post(&self, post_id: &str) -> BoxFuture<'_, ApiResult<Post>>;
    fn fetch_user(&self, user_id: &str) -> BoxFuture<'_, ApiResult<User>>;
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    /// Base URL of the backend REST API.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.pulse.social".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCommentRequest<'a> {
    post_id: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ViewsBatchRequest<'a> {
    content_ids: &'a [String],
}

/// Reqwest-backed `ApiClient` with bearer-token authentication.
pub struct HttpApiClient {
    config: HttpApiConfig,
    client: reqwest::Client,
    auth_token: String,
}

impl HttpApiClient {
    /// Create a new HTTP API client.
    pub fn new(config: HttpApiConfig, auth_token: &str) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            client,
            auth_token: auth_token.to_string(),
        })
    }

    /// Update the auth token after a refresh.
    pub fn set_auth_token(&mut self, token: &str) {
        self.auth_token = token.to_string();
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> ApiResult<T> {
        let url = self.url(path);
        debug!(url = %url, "API request");

        let mut request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.auth_token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    /// POST where the response body carries nothing worth parsing.
    async fn post_no_content<B: Serialize>(&self, path: &str, body: Option<&B>) -> ApiResult<()> {
        let url = self.url(path);
        debug!(url = %url, "API request");

        let mut request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.auth_token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let url = self.url(path);
        debug!(url = %url, "API delete");

        let response = self
            .client
            .delete(&url)
            .header("Authorization", format!("Bearer {}", self.auth_token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let url = self.url(path);
        debug!(url = %url, "API fetch");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.auth_token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

impl ApiClient for HttpApiClient {
    fn like_post(&self, post_id: &str) -> BoxFuture<'_, ApiResult<LikeResponse>> {
        let path = format!("/posts/{}/like", post_id);
        Box::pin(async move { self.post_json::<(), _>(&path, None).await })
    }

    fn unlike_post(&self, post_id: &str) -> BoxFuture<'_, ApiResult<LikeResponse>> {
        let path = format!("/posts/{}/unlike", post_id);
        Box::pin(async move { self.post_json::<(), _>(&path, None).await })
    }

    fn follow_user(&self, user_id: &str) -> BoxFuture<'_, ApiResult<FollowResponse>> {
        let path = format!("/users/{}/follow", user_id);
        Box::pin(async move { self.post_json::<(), _>(&path, None).await })
    }

    fn unfollow_user(&self, user_id: &str) -> BoxFuture<'_, ApiResult<FollowResponse>> {
        let path = format!("/users/{}/unfollow", user_id);
        Box::pin(async move { self.post_json::<(), _>(&path, None).await })
    }

    fn create_comment(
        &self,
        post_id: &str,
        body: &str,
    ) -> BoxFuture<'_, ApiResult<CommentCreateResponse>> {
        let post_id = post_id.to_string();
        let body = body.to_string();
        Box::pin(async move {
            let request = CreateCommentRequest {
                post_id: &post_id,
                body: &body,
            };
            self.post_json("/comments", Some(&request)).await
        })
    }

    fn delete_comment(&self, comment_id: &str) -> BoxFuture<'_, ApiResult<CommentDeleteResponse>> {
        let path = format!("/comments/{}", comment_id);
        Box::pin(async move { self.delete_json(&path).await })
    }

    fn report_view(&self, content_id: &str) -> BoxFuture<'_, ApiResult<()>> {
        let path = format!("/views/{}", content_id);
        Box::pin(async move { self.post_no_content::<()>(&path, None).await })
    }

    fn report_views_batch(&self, content_ids: &[String]) -> BoxFuture<'_, ApiResult<()>> {
        let content_ids = content_ids.to_vec();
        Box::pin(async move {
            let request = ViewsBatchRequest {
                content_ids: &content_ids,
            };
            self.post_no_content("/views/batch", Some(&request)).await
        })
    }

    fn fetch_post(&self, post_id: &str) -> BoxFuture<'_, ApiResult<Post>> {
        let path = format!("/posts/{}", post_id);
        Box::pin(async move { self.get_json(&path).await })
    }

    fn fetch_user(&self, user_id: &str) -> BoxFuture<'_, ApiResult<User>> {
        let path = format!("/users/{}", user_id);
        Box::pin(async move { self.get_json(&path).await })
    }
}
