//! WebSocket Handler
//!
//! Upgrades `/ws`, authenticates the session from the query string, and
//! speaks the envelope protocol for the lifetime of the socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::auth::{AuthError, Identity, SessionQuery};
use super::hub::ChannelHub;
use crate::api::AppState;
use crate::protocol::{codec, Channel, Envelope, MessageType};

type SocketSink = SplitSink<WebSocket, Message>;

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(session): Query<SessionQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    // Verified before the upgrade; a rejection is reported in-band
    let identity = state.authenticator.verify_query(&session);
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub, identity))
}

async fn handle_socket(socket: WebSocket, hub: Arc<ChannelHub>, identity: Result<Identity, AuthError>) {
    let (mut sender, mut receiver) = socket.split();

    let identity = match identity {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting socket: authentication failed");
            send_envelope(&mut sender, &Envelope::auth_error(e.to_string())).await;
            let _ = sender.close().await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let connection_id = match hub.register(&identity.user_id, tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, user_id = %identity.user_id, "Failed to register socket");
            send_envelope(&mut sender, &Envelope::error(e.to_string())).await;
            let _ = sender.close().await;
            return;
        }
    };

    let greeting = Envelope::connected(&connection_id, &identity.user_id);
    if !send_envelope(&mut sender, &greeting).await {
        tracing::debug!(connection_id = %connection_id, "Socket closed before greeting");
        hub.unregister(&connection_id).await;
        return;
    }

    let conn_id_for_send = connection_id.clone();

    // Queue → socket
    let mut send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if !send_envelope(&mut sender, &envelope).await {
                tracing::debug!(
                    connection_id = %conn_id_for_send,
                    "Socket send failed, closing connection"
                );
                break;
            }
        }
    });

    let session = Session {
        hub: Arc::clone(&hub),
        connection_id: connection_id.clone(),
        user_id: identity.user_id,
    };

    // Socket → hub
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(message) => {
                    if !session.on_message(message).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %session.connection_id,
                        error = %e,
                        "Socket receive error"
                    );
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(&connection_id).await;
}

/// Encode and write one envelope; false when the socket is gone
async fn send_envelope(sender: &mut SocketSink, envelope: &Envelope) -> bool {
    match codec::encode(envelope) {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, kind = ?envelope.kind, "Failed to encode envelope");
            true
        }
    }
}

/// One authenticated socket
struct Session {
    hub: Arc<ChannelHub>,
    connection_id: String,
    user_id: String,
}

impl Session {
    /// Returns false if the connection should be closed
    async fn on_message(&self, message: Message) -> bool {
        match message {
            Message::Text(text) => {
                match codec::decode(&text).and_then(|envelope| envelope.validate().map(|_| envelope)) {
                    Ok(envelope) => self.on_envelope(envelope).await,
                    Err(e) => {
                        tracing::debug!(
                            connection_id = %self.connection_id,
                            error = %e,
                            "Invalid client frame"
                        );
                        self.reply(Envelope::error(format!("Invalid message format: {}", e)))
                            .await;
                    }
                }
                true
            }
            Message::Binary(_) => {
                self.reply(Envelope::error("Binary messages not supported")).await;
                true
            }
            // Control frames are handled by axum
            Message::Ping(_) | Message::Pong(_) => true,
            Message::Close(_) => {
                tracing::debug!(connection_id = %self.connection_id, "Client requested close");
                false
            }
        }
    }

    async fn on_envelope(&self, envelope: Envelope) {
        match (envelope.kind, envelope.channel) {
            (MessageType::Subscribe, Some(channel)) => {
                match self.hub.subscribe(&self.connection_id, channel).await {
                    Ok(count) => self.reply(Envelope::subscribed(channel, count)).await,
                    Err(e) => self.reply(Envelope::error(e.to_string())).await,
                }
            }
            (MessageType::Unsubscribe, Some(channel)) => {
                match self.hub.unsubscribe(&self.connection_id, channel).await {
                    Ok(count) => self.reply(Envelope::unsubscribed(channel, count)).await,
                    Err(e) => self.reply(Envelope::error(e.to_string())).await,
                }
            }
            (MessageType::Message, Some(channel)) => {
                let recipients = self
                    .forward_message(channel, envelope.data, envelope.target_user_id)
                    .await;
                self.reply(Envelope::message_sent(channel, recipients)).await;
            }
            (MessageType::Broadcast, Some(channel)) => {
                let forward = Envelope::broadcast(channel, envelope.data.unwrap_or(Value::Null))
                    .with_from(self.user_id.as_str());
                let reached = self.hub.broadcast(channel, &forward, None).await;
                self.reply(Envelope::broadcast_sent(channel, reached)).await;
            }
            (MessageType::Ping, _) => self.reply(Envelope::pong()).await,
            (MessageType::Pong, _) => {}
            (kind, _) => {
                self.reply(Envelope::error(format!("Unsupported message type: {:?}", kind)))
                    .await;
            }
        }
    }

    /// Targeted messages report 0 or 1 recipients; channel messages skip the sender
    async fn forward_message(&self, channel: Channel, data: Option<Value>, target: Option<String>) -> usize {
        let forward = Envelope::message(channel, data.unwrap_or(Value::Null), target.clone())
            .with_from(self.user_id.as_str());

        match target {
            Some(user_id) => {
                let reached = self.hub.send_to_user(&user_id, &forward).await;
                tracing::debug!(channel = %channel, target = %user_id, reached, "Routed message");
                reached.min(1)
            }
            None => {
                self.hub
                    .broadcast(channel, &forward, Some(&self.connection_id))
                    .await
            }
        }
    }

    async fn reply(&self, envelope: Envelope) {
        if let Err(e) = self.hub.send_to(&self.connection_id, envelope).await {
            tracing::debug!(connection_id = %self.connection_id, error = %e, "Reply dropped");
        }
    }
}
