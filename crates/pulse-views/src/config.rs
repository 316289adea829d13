//! View aggregator configuration.

/// Configuration for the view batch aggregator.
#[derive(Debug, Clone)]
pub struct ViewConfig {
    /// Pending ids that trigger an immediate flush.
    pub batch_threshold: usize,
    /// Maximum time a pending id waits before a flush, in milliseconds,
    /// measured from the oldest pending entry.
    pub max_delay_ms: u64,
    /// Failed flushes an id survives before being dropped for the session.
    pub max_retries: u32,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 10,
            max_delay_ms: 2000,
            max_retries: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = ViewConfig::default();
        assert_eq!(config.batch_threshold, 10);
        assert_eq!(config.max_delay_ms, 2000);
        assert_eq!(config.max_retries, 3);
    }
}
