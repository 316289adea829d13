//! # Pulse Cache
//!
//! The normalized in-memory entity cache backing every UI observer.
//!
//! ## Non-negotiable Principles
//!
//! - **Entities are flat** - A post holds an author *id*, never an embedded
//!   author object, so one user update is visible to every view that
//!   references that user id
//! - **Writers own disjoint slices** - Presence writes presence fields,
//!   mutations write counters/flags, the view aggregator writes view counts
//! - **Change notifications fire after the write commits**
//! - **UI observers are read-only**
//!
//! ## Example
//!
//! ```rust
//! use pulse_cache::{CacheKey, EntityKind, EntityValue, Post, StructuredCache};
//!
//! let cache = StructuredCache::new();
//! let key = CacheKey::post("post-1");
//!
//! cache.insert(key.clone(), EntityValue::Post(Post::new("post-1", "user-1")));
//! cache.update(&key, |value| {
//!     if let EntityValue::Post(post) = value {
//!         post.likes_count += 1;
//!     }
//! }).unwrap();
//!
//! assert_eq!(cache.get(&key).unwrap().version, 2);
//! ```

mod live;
mod store;
mod types;

pub use live::{CacheUpdate, ChangeHub, ChangeSubscription};
pub use store::{CacheSnapshot, StructuredCache};
pub use types::{CacheEntry, CacheKey, Chat, Comment, EntityKind, EntityValue, Post, User};

/// Errors that can occur in the cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No entry exists under the given key.
    #[error("entry not found: {0}")]
    NotFound(CacheKey),
}

/// Result type alias using CacheError.
pub type CacheResult<T> = Result<T, CacheError>;
