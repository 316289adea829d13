//! A recording `ApiClient` for tests.
//!
//! Records every call, serves scripted outcomes in order (defaulting to
//! success), and hands out fixture entities for the re-fetch fallback.

use crate::client::ApiClient;
use crate::error::{ApiError, ApiResult};
use crate::types::{CommentCreateResponse, CommentDeleteResponse, FollowResponse, LikeResponse};
use futures_util::future::BoxFuture;
use pulse_cache::{Post, User};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A call observed by the recording client.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    LikePost(String),
    UnlikePost(String),
    FollowUser(String),
    UnfollowUser(String),
    CreateComment { post_id: String, body: String },
    DeleteComment(String),
    ReportView(String),
    ReportViewsBatch(Vec<String>),
    FetchPost(String),
    FetchUser(String),
}

/// In-memory `ApiClient` that records calls and serves scripted outcomes.
///
/// Each call consumes one queued outcome; an empty queue means success.
/// Successful comment creates mint `srv-<n>` ids. Returned futures yield
/// once before resolving so in-flight interleavings are exercisable.
pub struct RecordingApi {
    calls: Mutex<Vec<ApiCall>>,
    failures: Mutex<VecDeque<String>>,
    fail_all: Mutex<Option<String>>,
    like_responses: Mutex<VecDeque<LikeResponse>>,
    follow_responses: Mutex<VecDeque<FollowResponse>>,
    comment_seq: AtomicU64,
    posts: Mutex<HashMap<String, Post>>,
    users: Mutex<HashMap<String, User>>,
}

impl RecordingApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            fail_all: Mutex::new(None),
            like_responses: Mutex::new(VecDeque::new()),
            follow_responses: Mutex::new(VecDeque::new()),
            comment_seq: AtomicU64::new(1),
            posts: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a failure for the next call (consumed in order).
    pub fn queue_failure(&self, message: &str) {
        self.failures
            .lock()
            .expect("lock poisoned")
            .push_back(message.to_string());
    }

    /// Make every subsequent call fail until [`Self::clear_fail_all`].
    pub fn fail_all(&self, message: &str) {
        *self.fail_all.lock().expect("lock poisoned") = Some(message.to_string());
    }

    pub fn clear_fail_all(&self) {
        *self.fail_all.lock().expect("lock poisoned") = None;
    }

    /// Queue an authoritative like/unlike response payload.
    pub fn queue_like_response(&self, response: LikeResponse) {
        self.like_responses
            .lock()
            .expect("lock poisoned")
            .push_back(response);
    }

    /// Queue an authoritative follow/unfollow response payload.
    pub fn queue_follow_response(&self, response: FollowResponse) {
        self.follow_responses
            .lock()
            .expect("lock poisoned")
            .push_back(response);
    }

    /// Install a fixture post served by `fetch_post`.
    pub fn put_post(&self, post: Post) {
        self.posts
            .lock()
            .expect("lock poisoned")
            .insert(post.id.clone(), post);
    }

    /// Install a fixture user served by `fetch_user`.
    pub fn put_user(&self, user: User) {
        self.users
            .lock()
            .expect("lock poisoned")
            .insert(user.id.clone(), user);
    }

    /// All calls observed so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("lock poisoned").len()
    }

    /// All ids reported across every batch call, in order.
    pub fn batched_view_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter_map(|call| match call {
                ApiCall::ReportViewsBatch(ids) => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn record(&self, call: ApiCall) -> ApiResult<()> {
        self.calls.lock().expect("lock poisoned").push(call);

        if let Some(message) = self.fail_all.lock().expect("lock poisoned").clone() {
            return Err(ApiError::Rejected(message));
        }
        if let Some(message) = self.failures.lock().expect("lock poisoned").pop_front() {
            return Err(ApiError::Rejected(message));
        }
        Ok(())
    }

    fn next_like_response(&self) -> LikeResponse {
        self.like_responses
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_default()
    }

    fn next_follow_response(&self) -> FollowResponse {
        self.follow_responses
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_default()
    }
}

impl Default for RecordingApi {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClient for RecordingApi {
    fn like_post(&self, post_id: &str) -> BoxFuture<'_, ApiResult<LikeResponse>> {
        let result = self
            .record(ApiCall::LikePost(post_id.to_string()))
            .map(|_| self.next_like_response());
        Box::pin(async move {
            tokio::task::yield_now().await;
            result
        })
    }

    fn unlike_post(&self, post_id: &str) -> BoxFuture<'_, ApiResult<LikeResponse>> {
        let result = self
            .record(ApiCall::UnlikePost(post_id.to_string()))
            .map(|_| self.next_like_response());
        Box::pin(async move {
            tokio::task::yield_now().await;
            result
        })
    }

    fn follow_user(&self, user_id: &str) -> BoxFuture<'_, ApiResult<FollowResponse>> {
        let result = self
            .record(ApiCall::FollowUser(user_id.to_string()))
            .map(|_| self.next_follow_response());
        Box::pin(async move {
            tokio::task::yield_now().await;
            result
        })
    }

    fn unfollow_user(&self, user_id: &str) -> BoxFuture<'_, ApiResult<FollowResponse>> {
        let result = self
            .record(ApiCall::UnfollowUser(user_id.to_string()))
            .map(|_| self.next_follow_response());
        Box::pin(async move {
            tokio::task::yield_now().await;
            result
        })
    }

    fn create_comment(
        &self,
        post_id: &str,
        body: &str,
    ) -> BoxFuture<'_, ApiResult<CommentCreateResponse>> {
        let result = self
            .record(ApiCall::CreateComment {
                post_id: post_id.to_string(),
                body: body.to_string(),
            })
            .map(|_| CommentCreateResponse {
                id: format!("srv-{}", self.comment_seq.fetch_add(1, Ordering::SeqCst)),
                comments_count: None,
            });
        Box::pin(async move {
            tokio::task::yield_now().await;
            result
        })
    }

    fn delete_comment(&self, comment_id: &str) -> BoxFuture<'_, ApiResult<CommentDeleteResponse>> {
        let result = self
            .record(ApiCall::DeleteComment(comment_id.to_string()))
            .map(|_| CommentDeleteResponse::default());
        Box::pin(async move {
            tokio::task::yield_now().await;
            result
        })
    }

    fn report_view(&self, content_id: &str) -> BoxFuture<'_, ApiResult<()>> {
        let result = self.record(ApiCall::ReportView(content_id.to_string()));
        Box::pin(async move {
            tokio::task::yield_now().await;
            result
        })
    }

    fn report_views_batch(&self, content_ids: &[String]) -> BoxFuture<'_, ApiResult<()>> {
        let result = self.record(ApiCall::ReportViewsBatch(content_ids.to_vec()));
        Box::pin(async move {
            tokio::task::yield_now().await;
            result
        })
    }

    fn fetch_post(&self, post_id: &str) -> BoxFuture<'_, ApiResult<Post>> {
        let result = self
            .record(ApiCall::FetchPost(post_id.to_string()))
            .and_then(|_| {
                self.posts
                    .lock()
                    .expect("lock poisoned")
                    .get(post_id)
                    .cloned()
                    .ok_or_else(|| ApiError::Status {
                        status: 404,
                        body: format!("no fixture post {}", post_id),
                    })
            });
        Box::pin(async move {
            tokio::task::yield_now().await;
            result
        })
    }

    fn fetch_user(&self, user_id: &str) -> BoxFuture<'_, ApiResult<User>> {
        let result = self
            .record(ApiCall::FetchUser(user_id.to_string()))
            .and_then(|_| {
                self.users
                    .lock()
                    .expect("lock poisoned")
                    .get(user_id)
                    .cloned()
                    .ok_or_else(|| ApiError::Status {
                        status: 404,
                        body: format!("no fixture user {}", user_id),
                    })
            });
        Box::pin(async move {
            tokio::task::yield_now().await;
            result
        })
    }
}
