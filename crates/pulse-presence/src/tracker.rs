//! Presence tracker.

use pulse_cache::{CacheKey, ChangeSubscription, EntityValue, StructuredCache, User};
use pulse_channel::{
    ChannelClient, ChannelMessageType, ConnectionState, PresenceDelta, PresenceSnapshot,
    SubscriptionHandle,
};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Bootstrap phase. Deltas arriving while a snapshot is outstanding are
/// buffered and replayed on top of it.
enum BootstrapState {
    Live,
    AwaitingBootstrap { buffered: Vec<PresenceDelta> },
}

/// Tracks which users are online, writing into the presence slice of
/// cached user entries.
pub struct PresenceTracker {
    cache: Arc<StructuredCache>,
    channel: ChannelClient,
    state: Mutex<BootstrapState>,
    handles: Mutex<Vec<SubscriptionHandle>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceTracker {
    pub fn new(cache: Arc<StructuredCache>, channel: ChannelClient) -> Arc<Self> {
        Arc::new(Self {
            cache,
            channel,
            state: Mutex::new(BootstrapState::Live),
            handles: Mutex::new(Vec::new()),
            watcher: Mutex::new(None),
        })
    }

    /// Wire the tracker onto the channel: presence message handlers plus a
    /// watcher that re-bootstraps on every transition to Connected.
    pub fn attach(self: &Arc<Self>) {
        let mut handles = self.handles.lock().expect("lock poisoned");
        if !handles.is_empty() {
            return;
        }

        for event in [
            ChannelMessageType::UserStatusChanged,
            ChannelMessageType::GlobalUserStatusChanged,
        ] {
            let tracker = Arc::clone(self);
            handles.push(self.channel.subscribe(event, move |msg| {
                if let Some(delta) = msg.presence_delta() {
                    tracker.on_delta(delta);
                }
            }));
        }

        let tracker = Arc::clone(self);
        handles.push(self.channel.subscribe(
            ChannelMessageType::CurrentOnlineStatuses,
            move |msg| {
                if let Some(snapshot) = msg.presence_snapshot() {
                    tracker.on_snapshot(snapshot);
                }
            },
        ));
        drop(handles);

        let tracker = Arc::clone(self);
        let mut states = self.channel.state_watch();
        let watcher = tokio::spawn(async move {
            if *states.borrow() == ConnectionState::Connected {
                tracker.begin_bootstrap().await;
            }
            while states.changed().await.is_ok() {
                if *states.borrow() == ConnectionState::Connected {
                    tracker.begin_bootstrap().await;
                }
            }
        });
        *self.watcher.lock().expect("lock poisoned") = Some(watcher);
    }

    /// Remove channel handlers and stop the connection watcher.
    pub fn detach(&self) {
        for handle in self.handles.lock().expect("lock poisoned").drain(..) {
            self.channel.unsubscribe(&handle);
        }
        if let Some(watcher) = self.watcher.lock().expect("lock poisoned").take() {
            watcher.abort();
        }
    }

    /// Synchronous online-status read. Unknown users are offline.
    pub fn get_status(&self, user_id: &str) -> bool {
        self.cache
            .get(&CacheKey::user(user_id))
            .and_then(|entry| entry.value.as_user().map(|user| user.is_online))
            .unwrap_or(false)
    }

    /// Reactive per-user subscription; fires on any change to the user's
    /// cache entry, presence included.
    pub fn subscribe_user(&self, user_id: &str) -> ChangeSubscription {
        self.cache.subscribe(&CacheKey::user(user_id))
    }

    /// Enter the awaiting-bootstrap window and request a fresh snapshot.
    async fn begin_bootstrap(&self) {
        *self.state.lock().expect("lock poisoned") = BootstrapState::AwaitingBootstrap {
            buffered: Vec::new(),
        };
        debug!("Requesting online-status bootstrap");
        if let Err(e) = self.channel.request_online_statuses().await {
            // The snapshot request rides the connection that just came up;
            // a failure here means the connection dropped again and the
            // next Connected transition re-bootstraps.
            warn!(error = %e, "Failed to request online statuses");
        }
    }

    fn on_delta(&self, delta: PresenceDelta) {
        let mut state = self.state.lock().expect("lock poisoned");
        if let BootstrapState::AwaitingBootstrap { buffered } = &mut *state {
            debug!(user_id = %delta.user_id, "Buffering presence delta until bootstrap");
            buffered.push(delta);
            return;
        }
        drop(state);
        self.apply_delta(&delta);
    }

    fn on_snapshot(&self, snapshot: PresenceSnapshot) {
        let buffered = {
            let mut state = self.state.lock().expect("lock poisoned");
            let buffered = match std::mem::replace(&mut *state, BootstrapState::Live) {
                BootstrapState::AwaitingBootstrap { buffered } => buffered,
                BootstrapState::Live => Vec::new(),
            };
            buffered
        };

        debug!(
            users = snapshot.statuses.len(),
            replayed = buffered.len(),
            "Applying presence bootstrap"
        );

        // The snapshot is the new baseline: overwrite, never merge.
        for entry in &snapshot.statuses {
            self.write_presence(&entry.user_id, entry.is_online, entry.last_seen);
        }
        // Buffered deltas were pushed after the snapshot request on the same
        // in-order connection, so they are newer than the snapshot. This
        // includes users the snapshot never mentioned.
        for delta in &buffered {
            self.apply_delta(delta);
        }
    }

    fn apply_delta(&self, delta: &PresenceDelta) {
        self.write_presence(&delta.user_id, delta.is_online, delta.last_seen);
    }

    fn write_presence(
        &self,
        user_id: &str,
        is_online: bool,
        last_seen: Option<chrono::DateTime<chrono::Utc>>,
    ) {
        let key = CacheKey::user(user_id);
        self.cache.update_or_insert(
            &key,
            || EntityValue::User(User::new(user_id)),
            |value| {
                if let EntityValue::User(user) = value {
                    user.is_online = is_online;
                    user.last_seen = if is_online { None } else { last_seen };
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pulse_channel::PresenceEntry;

    fn tracker() -> Arc<PresenceTracker> {
        PresenceTracker::new(
            Arc::new(StructuredCache::new()),
            ChannelClient::with_defaults(),
        )
    }

    fn delta(user_id: &str, is_online: bool) -> PresenceDelta {
        PresenceDelta {
            user_id: user_id.to_string(),
            is_online,
            last_seen: None,
            conversation_id: None,
        }
    }

    fn snapshot(entries: &[(&str, bool)]) -> PresenceSnapshot {
        PresenceSnapshot {
            statuses: entries
                .iter()
                .map(|(id, online)| PresenceEntry {
                    user_id: id.to_string(),
                    is_online: *online,
                    last_seen: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn unknown_users_are_offline() {
        let tracker = tracker();
        assert!(!tracker.get_status("nobody"));
    }

    #[tokio::test]
    async fn delta_applies_directly_when_live() {
        let tracker = tracker();

        tracker.on_delta(delta("u1", true));
        assert!(tracker.get_status("u1"));

        tracker.on_delta(delta("u1", false));
        assert!(!tracker.get_status("u1"));
    }

    #[tokio::test]
    async fn deltas_buffer_while_awaiting_bootstrap() {
        let tracker = tracker();
        tracker.begin_bootstrap().await;

        tracker.on_delta(delta("u1", true));
        // Not applied yet.
        assert!(!tracker.get_status("u1"));

        tracker.on_snapshot(snapshot(&[]));
        // Replayed on top of the baseline even though the snapshot never
        // mentioned this user.
        assert!(tracker.get_status("u1"));
    }

    #[tokio::test]
    async fn bootstrap_is_baseline_not_merge() {
        let tracker = tracker();

        // Pre-reconnect state: u1 online.
        tracker.on_delta(delta("u1", true));
        assert!(tracker.get_status("u1"));

        // Reconnect: the new snapshot says u1 is offline and u2 online.
        tracker.begin_bootstrap().await;
        tracker.on_snapshot(snapshot(&[("u1", false), ("u2", true)]));

        assert!(!tracker.get_status("u1"));
        assert!(tracker.get_status("u2"));
    }

    #[tokio::test]
    async fn buffered_delta_wins_over_snapshot_entry() {
        let tracker = tracker();
        tracker.begin_bootstrap().await;

        tracker.on_delta(delta("u1", false));
        tracker.on_snapshot(snapshot(&[("u1", true)]));

        // The delta was pushed after the snapshot request, so it is newer.
        assert!(!tracker.get_status("u1"));
    }

    #[tokio::test]
    async fn offline_delta_records_last_seen() {
        let tracker = tracker();
        let seen = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();

        tracker.on_delta(PresenceDelta {
            user_id: "u1".to_string(),
            is_online: false,
            last_seen: Some(seen),
            conversation_id: None,
        });

        let user = tracker
            .cache
            .get(&CacheKey::user("u1"))
            .and_then(|entry| entry.value.as_user().cloned())
            .unwrap();
        assert!(!user.is_online);
        assert_eq!(user.last_seen, Some(seen));
    }

    #[tokio::test]
    async fn going_online_clears_last_seen() {
        let tracker = tracker();
        let seen = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();

        tracker.on_delta(PresenceDelta {
            user_id: "u1".to_string(),
            is_online: false,
            last_seen: Some(seen),
            conversation_id: None,
        });
        tracker.on_delta(delta("u1", true));

        let user = tracker
            .cache
            .get(&CacheKey::user("u1"))
            .and_then(|entry| entry.value.as_user().cloned())
            .unwrap();
        assert!(user.is_online);
        assert!(user.last_seen.is_none());
    }

    #[tokio::test]
    async fn presence_write_preserves_other_user_fields() {
        let tracker = tracker();
        let key = CacheKey::user("u1");

        let mut user = User::new("u1");
        user.followers_count = 42;
        user.followed_by_viewer = true;
        tracker.cache.insert(key.clone(), EntityValue::User(user));

        tracker.on_delta(delta("u1", true));

        let user = tracker
            .cache
            .get(&key)
            .and_then(|entry| entry.value.as_user().cloned())
            .unwrap();
        assert!(user.is_online);
        assert_eq!(user.followers_count, 42);
        assert!(user.followed_by_viewer);
    }

    #[tokio::test]
    async fn subscription_fires_on_presence_change() {
        let tracker = tracker();
        let subscription = tracker.subscribe_user("u1");

        tracker.on_delta(delta("u1", true));

        let update = subscription.try_recv().unwrap();
        assert_eq!(update.key, CacheKey::user("u1"));
        assert!(update
            .entry
            .as_ref()
            .and_then(|e| e.value.as_user())
            .map(|u| u.is_online)
            .unwrap_or(false));
    }
}
