//! WebSocket channel client for the Pulse backend.
//!
//! This crate provides:
//! - One persistent websocket connection shared by every subscriber
//! - Connect/authenticate handshake with a fatal-vs-transient error split
//! - Automatic reconnection with exponential backoff and a bounded budget
//! - A multi-handler event subscription registry with opaque removal tokens
//! - Heartbeat for connection keepalive

mod client;
mod error;
mod messages;
mod registry;

pub use client::{ChannelClient, ChannelConfig, ChannelEvent, ConnectionState, Credential};
pub use error::{ChannelError, ChannelResult};
pub use messages::{
    ChannelMessage, ChannelMessageType, PresenceDelta, PresenceEntry, PresenceSnapshot,
};
pub use registry::{SubscriptionHandle, SubscriptionRegistry};
