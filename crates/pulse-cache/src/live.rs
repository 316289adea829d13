//! Live subscriptions for cache changes.
//!
//! # Design Principles
//!
//! - Subscriptions are notified after writes are committed
//! - Subscribing never replaces an earlier subscriber
//! - Dropped subscribers are cleaned up lazily on notify

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::RwLock;

use crate::types::{CacheEntry, CacheKey};

/// A change notification for one cache key.
///
/// `entry: None` means the entry was removed.
#[derive(Debug, Clone)]
pub struct CacheUpdate {
    pub key: CacheKey,
    pub entry: Option<CacheEntry>,
}

/// A subscription to changes under one cache key.
pub struct ChangeSubscription {
    receiver: Receiver<CacheUpdate>,
    _key: CacheKey,
}

impl ChangeSubscription {
    fn new(key: CacheKey, receiver: Receiver<CacheUpdate>) -> Self {
        Self {
            receiver,
            _key: key,
        }
    }

    /// Blocks until the next update, or None once the hub is gone.
    pub fn recv(&self) -> Option<CacheUpdate> {
        self.receiver.recv().ok()
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<CacheUpdate> {
        self.receiver.try_recv().ok()
    }

    /// Blocking iterator over updates.
    pub fn iter(&self) -> impl Iterator<Item = CacheUpdate> + '_ {
        std::iter::from_fn(|| self.recv())
    }
}

/// Fan-out hub for cache change notifications, keyed by cache key.
#[derive(Debug)]
pub struct ChangeHub {
    subscribers: RwLock<HashMap<CacheKey, Vec<Sender<CacheUpdate>>>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new subscriber for a key. Updates committed before this
    /// call are not delivered.
    pub fn subscribe(&self, key: &CacheKey) -> ChangeSubscription {
        let (sender, receiver) = mpsc::channel();

        let mut subscribers = self.subscribers.write().expect("lock poisoned");
        subscribers
            .entry(key.clone())
            .or_insert_with(Vec::new)
            .push(sender);

        ChangeSubscription::new(key.clone(), receiver)
    }

    /// Broadcast an update to all subscribers of its key, dropping dead
    /// subscribers along the way.
    pub fn notify(&self, update: CacheUpdate) {
        let mut subscribers = self.subscribers.write().expect("lock poisoned");

        if let Some(senders) = subscribers.get_mut(&update.key) {
            senders.retain(|sender| sender.send(update.clone()).is_ok());
        }
    }

    /// Number of registered subscribers for a key. May include dead
    /// subscribers not yet cleaned up by a notify.
    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        let subscribers = self.subscribers.read().expect("lock poisoned");
        subscribers.get(key).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityValue, Post};

    fn make_update(id: &str, likes: u64) -> CacheUpdate {
        let mut post = Post::new(id, "author-1");
        post.likes_count = likes;
        CacheUpdate {
            key: CacheKey::post(id),
            entry: Some(CacheEntry {
                value: EntityValue::Post(post),
                version: 1,
            }),
        }
    }

    #[test]
    fn subscribe_and_receive() {
        let hub = ChangeHub::new();
        let key = CacheKey::post("p1");

        let sub = hub.subscribe(&key);
        assert_eq!(hub.subscriber_count(&key), 1);

        hub.notify(make_update("p1", 3));

        let update = sub.try_recv().unwrap();
        assert_eq!(update.entry.unwrap().value.as_post().unwrap().likes_count, 3);
    }

    #[test]
    fn multiple_subscribers_each_receive() {
        let hub = ChangeHub::new();
        let key = CacheKey::post("p1");

        let sub1 = hub.subscribe(&key);
        let sub2 = hub.subscribe(&key);
        assert_eq!(hub.subscriber_count(&key), 2);

        hub.notify(make_update("p1", 1));

        assert!(sub1.try_recv().is_some());
        assert!(sub2.try_recv().is_some());
    }

    #[test]
    fn dead_subscriber_cleanup() {
        let hub = ChangeHub::new();
        let key = CacheKey::post("p1");

        {
            let _sub = hub.subscribe(&key);
            assert_eq!(hub.subscriber_count(&key), 1);
        }

        hub.notify(make_update("p1", 1));
        assert_eq!(hub.subscriber_count(&key), 0);
    }

    #[test]
    fn keys_are_isolated() {
        let hub = ChangeHub::new();
        let sub1 = hub.subscribe(&CacheKey::post("p1"));
        let sub2 = hub.subscribe(&CacheKey::post("p2"));

        hub.notify(make_update("p1", 1));

        assert!(sub1.try_recv().is_some());
        assert!(sub2.try_recv().is_none());
    }

    #[test]
    fn no_update_before_subscribe() {
        let hub = ChangeHub::new();
        let key = CacheKey::post("p1");

        hub.notify(make_update("p1", 1));
        let sub = hub.subscribe(&key);

        assert!(sub.try_recv().is_none());
    }
}
