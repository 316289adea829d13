//! Multi-handler subscription registry.
//!
//! Many independent consumers can listen to the same message type at once.
//! Each subscription hands back an opaque [`SubscriptionHandle`] that removes
//! exactly that handler, leaving the others untouched.

use crate::messages::{ChannelMessage, ChannelMessageType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

type Handler = Arc<dyn Fn(&ChannelMessage) + Send + Sync>;

/// Opaque token returned by [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    event: ChannelMessageType,
    id: u64,
}

/// Registry mapping message types to lists of handlers.
///
/// Dispatch clones the handler list under the read lock and invokes outside
/// it, so a handler may subscribe or unsubscribe without deadlocking.
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<ChannelMessageType, Vec<(u64, Handler)>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a message type. Handlers for the same type are
    /// invoked in subscription order.
    pub fn subscribe<F>(&self, event: ChannelMessageType, handler: F) -> SubscriptionHandle
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .write()
            .expect("lock poisoned")
            .entry(event)
            .or_default()
            .push((id, Arc::new(handler)));
        SubscriptionHandle { event, id }
    }

    /// Remove the handler identified by `handle`. Idempotent: removing an
    /// already-removed handler is a no-op.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut handlers = self.handlers.write().expect("lock poisoned");
        if let Some(list) = handlers.get_mut(&handle.event) {
            list.retain(|(id, _)| *id != handle.id);
            if list.is_empty() {
                handlers.remove(&handle.event);
            }
        }
    }

    /// Invoke every handler registered for the message's type, in
    /// subscription order.
    pub fn dispatch(&self, message: &ChannelMessage) {
        let matching: Vec<Handler> = {
            let handlers = self.handlers.read().expect("lock poisoned");
            handlers
                .get(&message.msg_type)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        for handler in matching {
            handler(message);
        }
    }

    /// Number of handlers registered for a message type.
    pub fn handler_count(&self, event: ChannelMessageType) -> usize {
        self.handlers
            .read()
            .expect("lock poisoned")
            .get(&event)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
