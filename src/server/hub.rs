//! Channel Hub
//!
//! Tracks every socket connection, its user, and its channel subscriptions.
//! Outbound envelopes are queued on each connection's unbounded sender; the
//! per-socket writer task drains the queue.
//!
//! Lock order is always `connections` before `channels`.

use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::protocol::{Channel, Envelope};

/// Unique identifier for a socket connection
pub type ConnectionId = String;

/// Hub limits
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
        }
    }
}

struct ConnectionHandle {
    user_id: String,
    sender: mpsc::UnboundedSender<Envelope>,
    channels: HashSet<Channel>,
}

/// Connections and channel membership
pub struct ChannelHub {
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    channels: RwLock<HashMap<Channel, HashSet<ConnectionId>>>,
    config: HubConfig,
}

impl ChannelHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register an authenticated connection
    pub async fn register(
        &self,
        user_id: &str,
        sender: mpsc::UnboundedSender<Envelope>,
    ) -> Result<ConnectionId, HubError> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.config.max_connections {
            return Err(HubError::TooManyConnections(self.config.max_connections));
        }

        let id = Uuid::new_v4().to_string();
        connections.insert(
            id.clone(),
            ConnectionHandle {
                user_id: user_id.to_string(),
                sender,
                channels: HashSet::new(),
            },
        );

        tracing::info!(connection_id = %id, user_id = %user_id, "Socket connected");
        Ok(id)
    }

    /// Drop a connection and all of its subscriptions
    pub async fn unregister(&self, id: &str) {
        let mut connections = self.connections.write().await;
        let Some(handle) = connections.remove(id) else {
            return;
        };

        let mut channels = self.channels.write().await;
        for channel in handle.channels {
            if let Some(members) = channels.get_mut(&channel) {
                members.remove(id);
                if members.is_empty() {
                    channels.remove(&channel);
                }
            }
        }

        tracing::info!(connection_id = %id, "Socket disconnected");
    }

    /// Join a channel, returning its subscriber count
    pub async fn subscribe(&self, id: &str, channel: Channel) -> Result<usize, HubError> {
        let mut connections = self.connections.write().await;
        let handle = connections.get_mut(id).ok_or(HubError::ConnectionNotFound)?;
        handle.channels.insert(channel);

        let mut channels = self.channels.write().await;
        let members = channels.entry(channel).or_default();
        members.insert(id.to_string());

        tracing::debug!(connection_id = %id, channel = %channel, "Subscribed");
        Ok(members.len())
    }

    /// Leave a channel, returning its remaining subscriber count
    pub async fn unsubscribe(&self, id: &str, channel: Channel) -> Result<usize, HubError> {
        let mut connections = self.connections.write().await;
        let handle = connections.get_mut(id).ok_or(HubError::ConnectionNotFound)?;
        handle.channels.remove(&channel);

        let mut channels = self.channels.write().await;
        let remaining = match channels.get_mut(&channel) {
            Some(members) => {
                members.remove(id);
                let remaining = members.len();
                if remaining == 0 {
                    channels.remove(&channel);
                }
                remaining
            }
            None => 0,
        };

        tracing::debug!(connection_id = %id, channel = %channel, "Unsubscribed");
        Ok(remaining)
    }

    /// Deliver to every subscriber of `channel` except `exclude`; returns how many were reached
    pub async fn broadcast(&self, channel: Channel, envelope: &Envelope, exclude: Option<&str>) -> usize {
        let connections = self.connections.read().await;
        let channels = self.channels.read().await;

        let Some(members) = channels.get(&channel) else {
            return 0;
        };

        let mut reached = 0;
        for id in members {
            if exclude == Some(id.as_str()) {
                continue;
            }
            if let Some(handle) = connections.get(id) {
                if handle.sender.send(envelope.clone()).is_ok() {
                    reached += 1;
                }
            }
        }

        tracing::trace!(channel = %channel, reached, "Fan-out");
        reached
    }

    /// Deliver to every connection of one user; returns how many were reached
    pub async fn send_to_user(&self, user_id: &str, envelope: &Envelope) -> usize {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|handle| handle.user_id == user_id)
            .filter(|handle| handle.sender.send(envelope.clone()).is_ok())
            .count()
    }

    /// Queue an envelope on one connection
    pub async fn send_to(&self, id: &str, envelope: Envelope) -> Result<(), HubError> {
        let connections = self.connections.read().await;
        let handle = connections.get(id).ok_or(HubError::ConnectionNotFound)?;
        handle.sender.send(envelope).map_err(|_| HubError::SendFailed)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn subscriber_count(&self, channel: Channel) -> usize {
        self.channels
            .read()
            .await
            .get(&channel)
            .map_or(0, HashSet::len)
    }

    /// Subscriber count for every channel, in declaration order
    pub async fn channel_counts(&self) -> Vec<(Channel, usize)> {
        let channels = self.channels.read().await;
        Channel::ALL
            .iter()
            .map(|channel| (*channel, channels.get(channel).map_or(0, HashSet::len)))
            .collect()
    }
}

/// Errors that can occur in the channel hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Failed to send message")]
    SendFailed,
}
