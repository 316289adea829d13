//! Sync service configuration.

use pulse_channel::ChannelConfig;
use pulse_views::ViewConfig;

/// Top-level configuration for the sync service.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// REST API base URL.
    pub api_base_url: String,
    /// WebSocket channel configuration.
    pub channel: ChannelConfig,
    /// View batching configuration.
    pub views: ViewConfig,
    /// The signed-in user's id, used as the author of optimistic comments.
    pub viewer_id: String,
    /// Default log level when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.pulse.social".to_string(),
            channel: ChannelConfig::default(),
            views: ViewConfig::default(),
            viewer_id: String::new(),
            log_level: "info".to_string(),
        }
    }
}
