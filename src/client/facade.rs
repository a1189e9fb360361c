//! Public client API
//!
//! [`RealtimeClient`] is a cheap-to-clone handle over the connection task,
//! the subscription registry and the dispatcher. Construct one per session
//! inside a Tokio runtime; dropping the last clone shuts the session down.

use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::{broadcast, mpsc, watch};

use super::connection::{Command, ConnectionManager, ConnectionParts, SharedCredentials};
use super::credentials::SessionCredentials;
use super::dispatch::spawn_dispatcher;
use super::error::ClientResult;
use super::events::{ClientEvent, ConnectionState};
use super::registry::{self, Filter, SharedRegistry, SubscriptionId, SubscriptionRegistry};
use super::stats::{Stats, StatsTracker};
use super::transport::{Connector, WsConnector};
use crate::config::ClientConfig;
use crate::protocol::{Channel, Envelope};

const EVENT_CAPACITY: usize = 64;

/// Session-scoped real-time client
///
/// ```rust,no_run
/// use switchboard::client::{RealtimeClient, SessionCredentials};
/// use switchboard::config::ClientConfig;
/// use switchboard::protocol::Channel;
///
/// # async fn demo() -> anyhow::Result<()> {
/// let client = RealtimeClient::new(ClientConfig::default());
/// client.set_credentials(SessionCredentials::new("token").user("instructor-1"));
///
/// let _alerts = client.subscribe(Channel::Alerts, |envelope| {
///     println!("alert: {:?}", envelope.data);
///     Ok(())
/// });
///
/// client.connect().await?;
/// client.broadcast(Channel::Alerts, serde_json::json!({"severity": "high"}));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    manager: ConnectionManager,
    registry: SharedRegistry,
    stats: Arc<StatsTracker>,
    events: broadcast::Sender<ClientEvent>,
    credentials: SharedCredentials,
}

impl RealtimeClient {
    /// Client over WebSocket transport
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Client over a custom transport
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let registry: SharedRegistry = Arc::new(Mutex::new(SubscriptionRegistry::new()));
        let stats = Arc::new(StatsTracker::new());
        let credentials: SharedCredentials = Arc::new(RwLock::new(None));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        spawn_dispatcher(Arc::clone(&registry), dispatch_rx);

        let manager = ConnectionManager::spawn(ConnectionParts {
            config: config.clone(),
            connector,
            credentials: Arc::clone(&credentials),
            registry: Arc::clone(&registry),
            stats: Arc::clone(&stats),
            events: events.clone(),
            dispatch: dispatch_tx,
        });

        Self {
            inner: Arc::new(ClientInner {
                config,
                manager,
                registry,
                stats,
                events,
                credentials,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Credentials presented on the next handshake
    pub fn set_credentials(&self, credentials: SessionCredentials) {
        *self
            .inner
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(credentials);
    }

    pub fn clear_credentials(&self) {
        *self
            .inner
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Logout: forget credentials and close the connection
    pub async fn end_session(&self) {
        self.clear_credentials();
        self.disconnect().await;
        tracing::info!("Session ended");
    }

    /// Open the connection and wait for the handshake.
    ///
    /// Concurrent callers share one attempt. Returns immediately when
    /// already connected.
    pub async fn connect(&self) -> ClientResult<()> {
        self.inner.manager.connect().await
    }

    /// Close the connection and cancel any pending reconnect
    pub async fn disconnect(&self) {
        self.inner.manager.disconnect().await;
    }

    /// Register a callback for every business envelope on `channel`
    pub fn subscribe<F>(&self, channel: Channel, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(channel, None, Arc::new(callback))
    }

    /// Register a callback that only sees envelopes whose data matches `filter`
    pub fn subscribe_filtered<F>(
        &self,
        channel: Channel,
        filter: Filter,
        callback: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(channel, Some(filter), Arc::new(callback))
    }

    fn register(
        &self,
        channel: Channel,
        filter: Option<Filter>,
        callback: registry::Callback,
    ) -> SubscriptionHandle {
        let (id, first) = registry::lock(&self.inner.registry).insert(channel, callback, filter);
        if first {
            tracing::debug!(channel = %channel, "First subscription on channel");
            self.inner.manager.command(Command::Announce(channel));
        }

        SubscriptionHandle {
            id,
            channel,
            registry: Arc::downgrade(&self.inner.registry),
            commands: self.inner.manager.commands(),
        }
    }

    /// Drop every subscription on `channel`, returning how many were removed
    pub fn unsubscribe(&self, channel: Channel) -> usize {
        let removed = registry::lock(&self.inner.registry).remove_channel(channel);
        if removed > 0 {
            self.inner.manager.command(Command::Withdraw(channel));
        }
        removed
    }

    /// Send a message on `channel`, optionally to a single user.
    ///
    /// Dropped with a warning when not connected.
    pub fn send(&self, channel: Channel, data: Value, target_user_id: Option<&str>) {
        let envelope = Envelope::message(channel, data, target_user_id.map(str::to_string));
        self.publish(envelope);
    }

    /// Broadcast to every subscriber of `channel`, sender included
    pub fn broadcast(&self, channel: Channel, data: Value) {
        self.publish(Envelope::broadcast(channel, data));
    }

    fn publish(&self, envelope: Envelope) {
        if !self.is_connected() {
            tracing::warn!(
                kind = ?envelope.kind,
                channel = ?envelope.channel,
                "Not connected; dropping outbound envelope"
            );
            return;
        }
        if !self.inner.manager.command(Command::Publish(envelope)) {
            tracing::warn!("Connection task stopped; dropping outbound envelope");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.manager.watch()
    }

    /// Subscribe to client notifications
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> Stats {
        let subscriptions = registry::lock(&self.inner.registry).channels();
        self.inner.stats.snapshot(self.is_connected(), subscriptions)
    }
}

/// Cancellation token for one subscription
pub struct SubscriptionHandle {
    id: SubscriptionId,
    channel: Channel,
    registry: Weak<Mutex<SubscriptionRegistry>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry::lock(&registry).contains(self.id))
    }

    /// Remove this subscription. Idempotent; returns whether anything was removed.
    pub fn cancel(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let Some(removal) = registry::lock(&registry).remove(self.id) else {
            return false;
        };

        if removal.channel_emptied {
            tracing::debug!(channel = %removal.channel, "Last subscription on channel cancelled");
            let _ = self.commands.send(Command::Withdraw(removal.channel));
        }
        true
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}
