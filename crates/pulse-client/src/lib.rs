//! Pulse client sync core, composed.
//!
//! Wires the structured cache, channel client, presence tracker, mutation
//! coordinator, and view aggregator into one [`SyncService`] that an
//! application constructs at startup.
//!
//! ```ignore
//! let service = SyncService::with_http_api(SyncConfig::default(), &token)?;
//! service.start(Some(Credential::token(&token))).await?;
//! ```

mod config;
mod logging;
mod service;

pub use config::SyncConfig;
pub use logging::init_logging;
pub use service::SyncService;

pub use pulse_api::{ApiClient, ApiError, HttpApiClient, HttpApiConfig};
pub use pulse_cache::{CacheKey, EntityKind, EntityValue, StructuredCache};
pub use pulse_channel::{ChannelConfig, ChannelError, ChannelEvent, ConnectionState, Credential};
pub use pulse_mutations::{MutationError, MutationOutcome};
pub use pulse_views::ViewConfig;
