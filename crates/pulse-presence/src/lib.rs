//! Online-status tracking on top of the cache and channel.
//!
//! The tracker owns the presence slice of cached user entries. On every
//! transition to Connected it requests a fresh online-status snapshot and
//! buffers pushed deltas until the snapshot lands; the snapshot then becomes
//! the new baseline and the buffered deltas are replayed on top. This makes
//! presence correct across reconnects without merging stale state.

mod tracker;

pub use tracker::PresenceTracker;
