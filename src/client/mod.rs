//! Real-time Client
//!
//! Session-scoped WebSocket client for dashboards: one connection per
//! session, channel subscriptions with attribute filters, heartbeats, and
//! automatic reconnection with exponential backoff.

mod backoff;
mod connection;
mod credentials;
mod dispatch;
mod error;
mod events;
mod facade;
mod registry;
mod stats;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::ReconnectPolicy;
pub use credentials::SessionCredentials;
pub use dispatch::{deliver, CallbackError, DeliveryReport};
pub use error::{ClientError, ClientResult};
pub use events::{ClientEvent, ConnectionState};
pub use facade::{RealtimeClient, SubscriptionHandle};
pub use registry::{Callback, Filter, Removal, SubscriptionId, SubscriptionRegistry};
pub use stats::Stats;
pub use transport::{session_url, Connector, Link, TransportError, WsConnector};
