//! Core cache types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind half of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Post,
    User,
    Chat,
    Comment,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Post => write!(f, "post"),
            EntityKind::User => write!(f, "user"),
            EntityKind::Chat => write!(f, "chat"),
            EntityKind::Comment => write!(f, "comment"),
        }
    }
}

/// Address of an entity: `(kind, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: EntityKind,
    pub id: String,
}

impl CacheKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn post(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Post, id)
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(EntityKind::User, id)
    }

    pub fn chat(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Chat, id)
    }

    pub fn comment(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Comment, id)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A post entity. Relations are id references, never nested objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub likes_count: u64,
    pub liked_by_viewer: bool,
    pub comments_count: u64,
    pub comment_ids: Vec<String>,
    pub views_count: u64,
}

impl Post {
    pub fn new(id: impl Into<String>, author_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author_id: author_id.into(),
            likes_count: 0,
            liked_by_viewer: false,
            comments_count: 0,
            comment_ids: Vec::new(),
            views_count: 0,
        }
    }
}

/// A user entity. Presence fields live here so a single presence write is
/// visible to every view that references this user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub followers_count: u64,
    pub followed_by_viewer: bool,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            followers_count: 0,
            followed_by_viewer: false,
            is_online: false,
            last_seen: None,
        }
    }
}

/// A chat entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub participant_ids: Vec<String>,
    pub unread_count: u64,
}

impl Chat {
    pub fn new(id: impl Into<String>, participant_ids: Vec<String>) -> Self {
        Self {
            id: id.into(),
            participant_ids,
            unread_count: 0,
        }
    }
}

/// A comment entity. `pending` marks an optimistic placeholder whose create
/// request has not settled yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub body: String,
    pub pending: bool,
}

/// The value half of a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityValue {
    Post(Post),
    User(User),
    Chat(Chat),
    Comment(Comment),
}

impl EntityValue {
    /// The kind this value stores under.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityValue::Post(_) => EntityKind::Post,
            EntityValue::User(_) => EntityKind::User,
            EntityValue::Chat(_) => EntityKind::Chat,
            EntityValue::Comment(_) => EntityKind::Comment,
        }
    }

    /// The entity id this value stores under.
    pub fn id(&self) -> &str {
        match self {
            EntityValue::Post(post) => &post.id,
            EntityValue::User(user) => &user.id,
            EntityValue::Chat(chat) => &chat.id,
            EntityValue::Comment(comment) => &comment.id,
        }
    }

    /// The cache key this value stores under.
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.kind(), self.id())
    }

    pub fn as_post(&self) -> Option<&Post> {
        match self {
            EntityValue::Post(post) => Some(post),
            _ => None,
        }
    }

    pub fn as_user(&self) -> Option<&User> {
        match self {
            EntityValue::User(user) => Some(user),
            _ => None,
        }
    }

    pub fn as_chat(&self) -> Option<&Chat> {
        match self {
            EntityValue::Chat(chat) => Some(chat),
            _ => None,
        }
    }

    pub fn as_comment(&self) -> Option<&Comment> {
        match self {
            EntityValue::Comment(comment) => Some(comment),
            _ => None,
        }
    }
}

/// A versioned cache entry. The version increments on every write, letting
/// observers detect changes without comparing values.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: EntityValue,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_display() {
        assert_eq!(CacheKey::post("p1").to_string(), "post:p1");
        assert_eq!(CacheKey::user("u1").to_string(), "user:u1");
        assert_eq!(CacheKey::chat("c1").to_string(), "chat:c1");
        assert_eq!(CacheKey::comment("cm1").to_string(), "comment:cm1");
    }

    #[test]
    fn entity_value_key_roundtrip() {
        let value = EntityValue::Post(Post::new("p1", "u1"));
        assert_eq!(value.key(), CacheKey::post("p1"));
        assert_eq!(value.kind(), EntityKind::Post);
        assert_eq!(value.id(), "p1");
    }

    #[test]
    fn post_starts_empty() {
        let post = Post::new("p1", "u1");
        assert_eq!(post.likes_count, 0);
        assert!(!post.liked_by_viewer);
        assert!(post.comment_ids.is_empty());
        assert_eq!(post.views_count, 0);
    }

    #[test]
    fn user_starts_offline() {
        let user = User::new("u1");
        assert!(!user.is_online);
        assert!(user.last_seen.is_none());
    }

    #[test]
    fn entity_value_accessors() {
        let post = EntityValue::Post(Post::new("p1", "u1"));
        assert!(post.as_post().is_some());
        assert!(post.as_user().is_none());

        let user = EntityValue::User(User::new("u1"));
        assert!(user.as_user().is_some());
        assert!(user.as_comment().is_none());
    }
}
