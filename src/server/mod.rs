//! Server Side
//!
//! The far end of the real-time protocol:
//!
//! - **ChannelHub**: socket connections, channel membership, fan-out
//! - **Handler**: `/ws` upgrade and envelope handling
//! - **PushStreamBridge**: one-way `/events` fallback
//! - **Authenticator**: session token → user id
//!
//! ## Example
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:8090/ws?token=abc&userId=instructor-1');
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   if (msg.type === 'connected') {
//!     ws.send(JSON.stringify({type: 'subscribe', channel: 'alerts'}));
//!   }
//! };
//! ```

mod auth;
mod handler;
mod hub;
mod push_stream;

pub use auth::{AuthError, Authenticator, Identity, SessionQuery};
pub use handler::websocket_handler;
pub use hub::{ChannelHub, ConnectionId, HubConfig, HubError};
pub use push_stream::{ChangeEvent, PushConfig, PushEvent, PushStream, PushStreamBridge};
