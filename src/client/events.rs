//! Client notifications
//!
//! Process-wide events the hosting application can observe without the
//! client depending on any UI type.

use serde::Serialize;
use std::fmt;

use crate::protocol::Channel;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Events emitted by the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    /// Handshake completed and subscriptions re-announced
    Connected,
    /// Credentials rejected; no automatic reconnect follows
    AuthError { message: String },
    /// Reconnection gave up after the configured number of attempts
    MaxReconnectExceeded { attempts: u32 },
    ServerError { message: String },
    Subscribed { channel: Channel },
    Unsubscribed { channel: Channel },
    MessageSent { channel: Option<Channel>, recipient_count: usize },
    BroadcastSent { channel: Option<Channel>, subscriber_count: usize },
}
