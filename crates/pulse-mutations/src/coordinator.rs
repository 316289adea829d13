//! The optimistic mutation coordinator.

use crate::error::MutationResult;
use pulse_api::ApiClient;
use pulse_cache::{CacheKey, Comment, EntityValue, StructuredCache};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// How a mutation resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The request settled and the cache holds the authoritative state.
    Applied,
    /// An identical action was already in flight; this one was a no-op.
    Duplicate,
    /// A placeholder create was deleted before it settled; the entity never
    /// existed remotely.
    Cancelled,
}

/// A comment create whose request has not settled. `delete_requested` is set
/// when the placeholder is deleted before settlement.
struct PendingCreate {
    delete_requested: bool,
}

/// Coordinates optimistic mutations against the cache and the API.
///
/// One instance per session, shared behind an `Arc`. Mutation futures are
/// meant to run via [`MutationCoordinator::dispatch`] so UI teardown cannot
/// cancel the settle path mid-way.
pub struct MutationCoordinator {
    cache: Arc<StructuredCache>,
    api: Arc<dyn ApiClient>,
    viewer_id: String,
    pending: Mutex<HashSet<CacheKey>>,
    pending_creates: Mutex<HashMap<String, PendingCreate>>,
}

/// Clears the pending-guard entry when the mutation settles, whatever the
/// outcome.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashSet<CacheKey>>,
    key: CacheKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().expect("lock poisoned").remove(&self.key);
    }
}

impl MutationCoordinator {
    pub fn new(
        cache: Arc<StructuredCache>,
        api: Arc<dyn ApiClient>,
        viewer_id: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            api,
            viewer_id: viewer_id.into(),
            pending: Mutex::new(HashSet::new()),
            pending_creates: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn a mutation future so it settles even if the caller goes away.
    /// Failures were already rolled back; here they are only logged.
    pub fn dispatch<F>(future: F) -> JoinHandle<()>
    where
        F: Future<Output = MutationResult<MutationOutcome>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = future.await {
                warn!(error = %e, "Mutation failed and was rolled back");
            }
        })
    }

    /// Like a post: flag on, count up, confirm with the backend.
    pub async fn like(&self, post_id: &str) -> MutationResult<MutationOutcome> {
        let key = CacheKey::post(post_id);
        let _guard = match self.try_begin(key.clone()) {
            Some(guard) => guard,
            None => return Ok(MutationOutcome::Duplicate),
        };

        let snapshot = self.cache.snapshot(&[key.clone()]);
        self.cache.update(&key, |value| {
            if let EntityValue::Post(post) = value {
                post.liked_by_viewer = true;
                post.likes_count += 1;
            }
        })?;

        match self.api.like_post(post_id).await {
            Ok(response) => {
                self.reconcile_like(&key, response.likes_count, response.liked)
                    .await;
                Ok(MutationOutcome::Applied)
            }
            Err(e) => {
                self.cache.restore(snapshot);
                Err(e.into())
            }
        }
    }

    /// Unlike a post.
    pub async fn unlike(&self, post_id: &str) -> MutationResult<MutationOutcome> {
        let key = CacheKey::post(post_id);
        let _guard = match self.try_begin(key.clone()) {
            Some(guard) => guard,
            None => return Ok(MutationOutcome::Duplicate),
        };

        let snapshot = self.cache.snapshot(&[key.clone()]);
        self.cache.update(&key, |value| {
            if let EntityValue::Post(post) = value {
                post.liked_by_viewer = false;
                post.likes_count = post.likes_count.saturating_sub(1);
            }
        })?;

        match self.api.unlike_post(post_id).await {
            Ok(response) => {
                self.reconcile_like(&key, response.likes_count, response.liked)
                    .await;
                Ok(MutationOutcome::Applied)
            }
            Err(e) => {
                self.cache.restore(snapshot);
                Err(e.into())
            }
        }
    }

    /// Follow a user.
    pub async fn follow(&self, user_id: &str) -> MutationResult<MutationOutcome> {
        let key = CacheKey::user(user_id);
        let _guard = match self.try_begin(key.clone()) {
            Some(guard) => guard,
            None => return Ok(MutationOutcome::Duplicate),
        };

        let snapshot = self.cache.snapshot(&[key.clone()]);
        self.cache.update(&key, |value| {
            if let EntityValue::User(user) = value {
                user.followed_by_viewer = true;
                user.followers_count += 1;
            }
        })?;

        match self.api.follow_user(user_id).await {
            Ok(response) => {
                self.reconcile_follow(&key, response.followers_count, response.following)
                    .await;
                Ok(MutationOutcome::Applied)
            }
            Err(e) => {
                self.cache.restore(snapshot);
                Err(e.into())
            }
        }
    }

    /// Unfollow a user.
    pub async fn unfollow(&self, user_id: &str) -> MutationResult<MutationOutcome> {
        let key = CacheKey::user(user_id);
        let _guard = match self.try_begin(key.clone()) {
            Some(guard) => guard,
            None => return Ok(MutationOutcome::Duplicate),
        };

        let snapshot = self.cache.snapshot(&[key.clone()]);
        self.cache.update(&key, |value| {
            if let EntityValue::User(user) = value {
                user.followed_by_viewer = false;
                user.followers_count = user.followers_count.saturating_sub(1);
            }
        })?;

        match self.api.unfollow_user(user_id).await {
            Ok(response) => {
                self.reconcile_follow(&key, response.followers_count, response.following)
                    .await;
                Ok(MutationOutcome::Applied)
            }
            Err(e) => {
                self.cache.restore(snapshot);
                Err(e.into())
            }
        }
    }

    /// Create a comment. A `temp-<uuid>` placeholder appears in the cache
    /// immediately and is swapped for the authoritative id on success.
    pub async fn create_comment(
        &self,
        post_id: &str,
        body: &str,
    ) -> MutationResult<MutationOutcome> {
        let post_key = CacheKey::post(post_id);
        let temp_id = format!("temp-{}", Uuid::new_v4());
        let temp_key = CacheKey::comment(&temp_id);

        let snapshot = self.cache.snapshot(&[post_key.clone(), temp_key.clone()]);
        self.cache.update(&post_key, |value| {
            if let EntityValue::Post(post) = value {
                post.comments_count += 1;
                post.comment_ids.push(temp_id.clone());
            }
        })?;
        self.cache.insert(
            temp_key.clone(),
            EntityValue::Comment(Comment {
                id: temp_id.clone(),
                post_id: post_id.to_string(),
                author_id: self.viewer_id.clone(),
                body: body.to_string(),
                pending: true,
            }),
        );
        self.pending_creates.lock().expect("lock poisoned").insert(
            temp_id.clone(),
            PendingCreate {
                delete_requested: false,
            },
        );

        let result = self.api.create_comment(post_id, body).await;

        let delete_requested = self
            .pending_creates
            .lock()
            .expect("lock poisoned")
            .remove(&temp_id)
            .map(|pending| pending.delete_requested)
            .unwrap_or(false);

        match result {
            Ok(response) => {
                if delete_requested {
                    // The placeholder is already gone locally; finish the
                    // cancellation with the authoritative id.
                    debug!(comment_id = %response.id, "Issuing queued delete for cancelled comment");
                    match self.api.delete_comment(&response.id).await {
                        Ok(delete_response) => {
                            self.reconcile_comment_count(&post_key, delete_response.comments_count);
                        }
                        Err(e) => {
                            warn!(error = %e, comment_id = %response.id, "Queued delete failed");
                        }
                    }
                    return Ok(MutationOutcome::Cancelled);
                }

                self.swap_comment_id(&post_key, &temp_key, &response.id);
                self.reconcile_comment_count(&post_key, response.comments_count);
                Ok(MutationOutcome::Applied)
            }
            Err(e) => {
                if delete_requested {
                    // Deleted locally and never created remotely; both
                    // requests are moot.
                    debug!("Suppressing failed create of an already-deleted comment");
                    return Ok(MutationOutcome::Cancelled);
                }
                self.cache.restore(snapshot);
                Err(e.into())
            }
        }
    }

    /// Delete a comment. Deleting a placeholder whose create has not settled
    /// cancels it locally; no delete request ever carries a temporary id.
    pub async fn delete_comment(&self, comment_id: &str) -> MutationResult<MutationOutcome> {
        let comment_key = CacheKey::comment(comment_id);
        let _guard = match self.try_begin(comment_key.clone()) {
            Some(guard) => guard,
            None => return Ok(MutationOutcome::Duplicate),
        };

        let entry = self
            .cache
            .get(&comment_key)
            .ok_or(pulse_cache::CacheError::NotFound(comment_key.clone()))?;
        let post_id = entry
            .value
            .as_comment()
            .map(|comment| comment.post_id.clone())
            .ok_or(pulse_cache::CacheError::NotFound(comment_key.clone()))?;
        let post_key = CacheKey::post(&post_id);

        // Placeholder whose create is still in flight: remove locally and
        // flag the pending create instead of talking to the backend.
        {
            let mut pending_creates = self.pending_creates.lock().expect("lock poisoned");
            if let Some(pending) = pending_creates.get_mut(comment_id) {
                pending.delete_requested = true;
                drop(pending_creates);
                self.remove_comment_locally(&post_key, &comment_key, comment_id);
                return Ok(MutationOutcome::Cancelled);
            }
        }

        let snapshot = self.cache.snapshot(&[comment_key.clone(), post_key.clone()]);
        self.remove_comment_locally(&post_key, &comment_key, comment_id);

        match self.api.delete_comment(comment_id).await {
            Ok(response) => {
                self.reconcile_comment_count(&post_key, response.comments_count);
                Ok(MutationOutcome::Applied)
            }
            Err(e) => {
                self.cache.restore(snapshot);
                Err(e.into())
            }
        }
    }

    fn try_begin(&self, key: CacheKey) -> Option<PendingGuard<'_>> {
        let mut pending = self.pending.lock().expect("lock poisoned");
        if !pending.insert(key.clone()) {
            debug!(key = %key, "Identical action already in flight");
            return None;
        }
        Some(PendingGuard {
            pending: &self.pending,
            key,
        })
    }

    /// Overwrite the optimistic like fields with whatever the server
    /// reported; a response with neither field falls back to a re-fetch.
    async fn reconcile_like(
        &self,
        key: &CacheKey,
        likes_count: Option<u64>,
        liked: Option<bool>,
    ) {
        if likes_count.is_none() && liked.is_none() {
            self.refetch_post(key).await;
            return;
        }
        let _ = self.cache.update(key, |value| {
            if let EntityValue::Post(post) = value {
                if let Some(count) = likes_count {
                    post.likes_count = count;
                }
                if let Some(liked) = liked {
                    post.liked_by_viewer = liked;
                }
            }
        });
    }

    async fn reconcile_follow(
        &self,
        key: &CacheKey,
        followers_count: Option<u64>,
        following: Option<bool>,
    ) {
        if followers_count.is_none() && following.is_none() {
            self.refetch_user(key).await;
            return;
        }
        let _ = self.cache.update(key, |value| {
            if let EntityValue::User(user) = value {
                if let Some(count) = followers_count {
                    user.followers_count = count;
                }
                if let Some(following) = following {
                    user.followed_by_viewer = following;
                }
            }
        });
    }

    fn reconcile_comment_count(&self, post_key: &CacheKey, comments_count: Option<u64>) {
        if let Some(count) = comments_count {
            let _ = self.cache.update(post_key, |value| {
                if let EntityValue::Post(post) = value {
                    post.comments_count = count;
                }
            });
        }
    }

    /// Swap a settled placeholder for its authoritative id: re-key the
    /// comment entry and rewrite every reference in the post's id list.
    fn swap_comment_id(&self, post_key: &CacheKey, temp_key: &CacheKey, real_id: &str) {
        if let Some(entry) = self.cache.get(temp_key) {
            if let Some(comment) = entry.value.as_comment() {
                let mut comment = comment.clone();
                comment.id = real_id.to_string();
                comment.pending = false;
                self.cache.remove(temp_key);
                self.cache
                    .insert(CacheKey::comment(real_id), EntityValue::Comment(comment));
            }
        }
        let temp_id = temp_key.id.clone();
        let _ = self.cache.update(post_key, |value| {
            if let EntityValue::Post(post) = value {
                for id in post.comment_ids.iter_mut() {
                    if *id == temp_id {
                        *id = real_id.to_string();
                    }
                }
            }
        });
    }

    fn remove_comment_locally(&self, post_key: &CacheKey, comment_key: &CacheKey, comment_id: &str) {
        self.cache.remove(comment_key);
        let _ = self.cache.update(post_key, |value| {
            if let EntityValue::Post(post) = value {
                post.comments_count = post.comments_count.saturating_sub(1);
                post.comment_ids.retain(|id| id != comment_id);
            }
        });
    }

    /// Re-fetch fallback for responses with nothing to reconcile. A failed
    /// re-fetch keeps the optimistic values; the next fetch of the entity
    /// converges it.
    async fn refetch_post(&self, key: &CacheKey) {
        match self.api.fetch_post(&key.id).await {
            Ok(post) => {
                self.cache.insert(key.clone(), EntityValue::Post(post));
            }
            Err(e) => {
                warn!(error = %e, key = %key, "Re-fetch after mutation failed");
            }
        }
    }

    async fn refetch_user(&self, key: &CacheKey) {
        match self.api.fetch_user(&key.id).await {
            Ok(user) => {
                self.cache.insert(key.clone(), EntityValue::User(user));
            }
            Err(e) => {
                warn!(error = %e, key = %key, "Re-fetch after mutation failed");
            }
        }
    }
}
