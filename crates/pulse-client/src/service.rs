//! The composed sync service.

use crate::config::SyncConfig;
use pulse_api::{ApiClient, ApiResult, HttpApiClient, HttpApiConfig};
use pulse_cache::StructuredCache;
use pulse_channel::{ChannelClient, ChannelResult, Credential};
use pulse_mutations::MutationCoordinator;
use pulse_presence::PresenceTracker;
use pulse_views::ViewAggregator;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

/// Client-side realtime state synchronization, composed.
///
/// Owns the cache and the workers around it. Built once at application
/// start and handed to collaborators by reference; the individual
/// components are reachable through accessors.
pub struct SyncService {
    cache: Arc<StructuredCache>,
    channel: ChannelClient,
    api: Arc<dyn ApiClient>,
    presence: Arc<PresenceTracker>,
    mutations: Arc<MutationCoordinator>,
    views: ViewAggregator,
    view_worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    /// Build the service around an injected API client.
    pub fn new(config: SyncConfig, api: Arc<dyn ApiClient>) -> Self {
        let cache = Arc::new(StructuredCache::new());
        let channel = ChannelClient::new(config.channel.clone());
        let presence = PresenceTracker::new(Arc::clone(&cache), channel.clone());
        let mutations =
            MutationCoordinator::new(Arc::clone(&cache), Arc::clone(&api), config.viewer_id.clone());
        let views = ViewAggregator::new(config.views.clone(), Arc::clone(&api), Arc::clone(&cache));

        Self {
            cache,
            channel,
            api,
            presence,
            mutations,
            views,
            view_worker: Mutex::new(None),
        }
    }

    /// Build the service with an HTTP API client against the configured
    /// base URL.
    pub fn with_http_api(config: SyncConfig, auth_token: &str) -> ApiResult<Self> {
        let api = HttpApiClient::new(
            HttpApiConfig {
                base_url: config.api_base_url.clone(),
                ..HttpApiConfig::default()
            },
            auth_token,
        )?;
        Ok(Self::new(config, Arc::new(api)))
    }

    /// Connect the channel and start the background workers. Resolves once
    /// the channel is authenticated.
    pub async fn start(&self, credential: Option<Credential>) -> ChannelResult<()> {
        // Attach before connecting so the Connected transition triggers the
        // presence bootstrap.
        self.presence.attach();
        {
            let mut worker = self.view_worker.lock().expect("lock poisoned");
            if worker.is_none() {
                *worker = Some(self.views.spawn_worker());
            }
        }

        self.channel.connect(credential).await?;
        info!("Sync service started");
        Ok(())
    }

    /// Disconnect and stop the workers, draining queued view reports.
    pub async fn shutdown(&self) {
        self.channel.disconnect().await;
        self.presence.detach();
        self.views.shutdown();

        let worker = self.view_worker.lock().expect("lock poisoned").take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        info!("Sync service stopped");
    }

    pub fn cache(&self) -> &Arc<StructuredCache> {
        &self.cache
    }

    pub fn channel(&self) -> &ChannelClient {
        &self.channel
    }

    pub fn api(&self) -> &Arc<dyn ApiClient> {
        &self.api
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn mutations(&self) -> &Arc<MutationCoordinator> {
        &self.mutations
    }

    pub fn views(&self) -> &ViewAggregator {
        &self.views
    }
}
