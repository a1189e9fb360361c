//! Application State
//!
//! Shared state accessible by all handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, ServerConfig};
use crate::server::{Authenticator, ChannelHub, HubConfig, PushConfig, PushStreamBridge};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Socket connections and channel membership
    pub hub: Arc<ChannelHub>,
    /// Open push streams
    pub push: Arc<PushStreamBridge>,
    /// Session token verification
    pub authenticator: Arc<Authenticator>,
    pub config: Arc<ServerConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self::with_authenticator(config.server.clone(), Authenticator::new(&config.auth))
    }

    pub fn with_authenticator(server: ServerConfig, authenticator: Authenticator) -> Self {
        let hub = ChannelHub::new(HubConfig {
            max_connections: server.max_connections,
        });
        let push = PushStreamBridge::new(PushConfig::from(&server));

        Self {
            hub: Arc::new(hub),
            push: Arc::new(push),
            authenticator: Arc::new(authenticator),
            config: Arc::new(server),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub async fn connection_count(&self) -> usize {
        self.hub.connection_count().await
    }
}
