//! # Switchboard
//!
//! Multiplexed real-time channels over a single WebSocket, with automatic
//! reconnection and a one-way push-stream fallback.
//!
//! ## Features
//!
//! - **One socket, many channels**: subscriptions are multiplexed by channel name
//! - **Resilient client**: heartbeat, exponential backoff, re-announced subscriptions
//! - **Isolated callbacks**: a failing subscriber never stops delivery to the rest
//! - **Push streams**: `CONNECTED` / `HEARTBEAT` / change events over SSE
//!
//! ## Modules
//!
//! - [`protocol`]: envelope shape and JSON codec shared by both ends
//! - [`client`]: connection manager, subscription registry, [`client::RealtimeClient`]
//! - [`server`]: channel hub, socket handler, push-stream bridge
//! - [`api`]: axum router and server lifecycle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchboard::client::{RealtimeClient, SessionCredentials};
//! use switchboard::config::ClientConfig;
//! use switchboard::protocol::Channel;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = RealtimeClient::new(ClientConfig::new("ws://localhost:8090/ws"));
//!     client.set_credentials(SessionCredentials::new("change-me").user("admin"));
//!
//!     let _updates = client.subscribe(Channel::Updates, |envelope| {
//!         println!("update from {:?}: {:?}", envelope.from, envelope.data);
//!         Ok(())
//!     });
//!
//!     client.connect().await?;
//!     client.broadcast(Channel::Updates, serde_json::json!({"table": "attendance"}));
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod protocol;
pub mod server;

pub use api::{build_router, serve, ApiError, AppState};

pub use client::{ClientError, ClientEvent, ConnectionState, RealtimeClient, SessionCredentials, Stats};

pub use config::{AuthConfig, ClientConfig, Config, ConfigError, LoggingConfig, ServerConfig};

pub use protocol::{Channel, Envelope, MessageType};

pub use server::{ChangeEvent, ChannelHub, PushStreamBridge};
