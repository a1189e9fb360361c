//! Envelope Types
//!
//! Defines the single message shape exchanged between dashboard clients
//! and the server, in both directions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::channel::Channel;
use super::codec::CodecError;

/// Closed set of envelope kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Handshake accepted by the server
    Connected,
    /// Client asks to join a channel
    Subscribe,
    /// Server confirms a subscribe
    Subscribed,
    /// Client asks to leave a channel
    Unsubscribe,
    /// Server confirms an unsubscribe
    Unsubscribed,
    /// Direct or channel message
    Message,
    /// Server acknowledgement of a `message`
    MessageSent,
    /// Fan-out to every subscriber of a channel
    Broadcast,
    /// Server acknowledgement of a `broadcast`
    BroadcastSent,
    /// Liveness probe
    Ping,
    /// Liveness reply
    Pong,
    /// Non-fatal server error
    Error,
    /// Credentials rejected; terminal for the session
    AuthError,
}

impl MessageType {
    /// Kinds that must always name a channel when sent by a client
    pub fn requires_channel(&self) -> bool {
        matches!(
            self,
            MessageType::Subscribe
                | MessageType::Unsubscribe
                | MessageType::Message
                | MessageType::Broadcast
        )
    }

    /// Kinds that are delivered to subscription callbacks
    pub fn is_business(&self) -> bool {
        matches!(self, MessageType::Message | MessageType::Broadcast)
    }
}

/// The unit exchanged over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Originating user id, stamped by the server on forwarded messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_count: Option<usize>,
    /// Single recipient for a routed `message`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<String>,
}

impl Envelope {
    /// Bare envelope of the given kind
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            channel: None,
            data: None,
            from: None,
            timestamp: None,
            error: None,
            success: None,
            recipient_count: None,
            subscriber_count: None,
            target_user_id: None,
        }
    }

    pub fn subscribe(channel: Channel) -> Self {
        Self::new(MessageType::Subscribe).with_channel(channel)
    }

    pub fn unsubscribe(channel: Channel) -> Self {
        Self::new(MessageType::Unsubscribe).with_channel(channel)
    }

    /// A channel message, optionally routed to one user
    pub fn message(channel: Channel, data: Value, target_user_id: Option<String>) -> Self {
        Self {
            data: Some(data),
            target_user_id,
            timestamp: Some(Utc::now()),
            ..Self::new(MessageType::Message).with_channel(channel)
        }
    }

    pub fn broadcast(channel: Channel, data: Value) -> Self {
        Self {
            data: Some(data),
            timestamp: Some(Utc::now()),
            ..Self::new(MessageType::Broadcast).with_channel(channel)
        }
    }

    pub fn ping() -> Self {
        Self {
            timestamp: Some(Utc::now()),
            ..Self::new(MessageType::Ping)
        }
    }

    pub fn pong() -> Self {
        Self {
            timestamp: Some(Utc::now()),
            ..Self::new(MessageType::Pong)
        }
    }

    /// Server greeting sent once authentication succeeds
    pub fn connected(connection_id: &str, user_id: &str) -> Self {
        Self {
            data: Some(serde_json::json!({
                "connectionId": connection_id,
                "userId": user_id,
            })),
            success: Some(true),
            timestamp: Some(Utc::now()),
            ..Self::new(MessageType::Connected)
        }
    }

    pub fn subscribed(channel: Channel, subscriber_count: usize) -> Self {
        Self {
            success: Some(true),
            subscriber_count: Some(subscriber_count),
            ..Self::new(MessageType::Subscribed).with_channel(channel)
        }
    }

    pub fn unsubscribed(channel: Channel, subscriber_count: usize) -> Self {
        Self {
            success: Some(true),
            subscriber_count: Some(subscriber_count),
            ..Self::new(MessageType::Unsubscribed).with_channel(channel)
        }
    }

    pub fn message_sent(channel: Channel, recipient_count: usize) -> Self {
        Self {
            success: Some(true),
            recipient_count: Some(recipient_count),
            ..Self::new(MessageType::MessageSent).with_channel(channel)
        }
    }

    pub fn broadcast_sent(channel: Channel, subscriber_count: usize) -> Self {
        Self {
            success: Some(true),
            subscriber_count: Some(subscriber_count),
            ..Self::new(MessageType::BroadcastSent).with_channel(channel)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            success: Some(false),
            ..Self::new(MessageType::Error)
        }
    }

    pub fn auth_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            success: Some(false),
            ..Self::new(MessageType::AuthError)
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Check the outbound invariants: channel-bearing kinds name a channel,
    /// and a ping never carries data.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.kind.requires_channel() && self.channel.is_none() {
            return Err(CodecError::MissingChannel(self.kind));
        }
        if self.kind == MessageType::Ping && self.data.is_some() {
            return Err(CodecError::PingWithData);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_serialize() {
        let json = serde_json::to_string(&Envelope::subscribe(Channel::Alerts)).unwrap();
        assert_eq!(json, r#"{"type":"subscribe","channel":"alerts"}"#);
    }

    #[test]
    fn test_message_serialize_camel_case() {
        let env = Envelope::message(Channel::Messages, json!({"text": "hi"}), Some("u-2".into()));
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"type\":\"message\""));
        assert!(json.contains("\"targetUserId\":\"u-2\""));
        assert!(json.contains("\"timestamp\""));
        assert!(!json.contains("recipientCount"));
    }

    #[test]
    fn test_ack_serialize() {
        let json = serde_json::to_string(&Envelope::broadcast_sent(Channel::Updates, 4)).unwrap();
        assert!(json.contains("\"type\":\"broadcast_sent\""));
        assert!(json.contains("\"subscriberCount\":4"));
    }

    #[test]
    fn test_deserialize_server_message() {
        let raw = r#"{"type":"message","channel":"alerts","data":{"severity":"high"},"from":"u-1","recipientCount":1}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.kind, MessageType::Message);
        assert_eq!(env.channel, Some(Channel::Alerts));
        assert_eq!(env.from.as_deref(), Some("u-1"));
        assert_eq!(env.recipient_count, Some(1));
        assert_eq!(env.data.unwrap()["severity"], "high");
    }

    #[test]
    fn test_validate_requires_channel() {
        let mut env = Envelope::broadcast(Channel::Events, json!({}));
        assert!(env.validate().is_ok());
        env.channel = None;
        assert!(matches!(
            env.validate(),
            Err(CodecError::MissingChannel(MessageType::Broadcast))
        ));
    }

    #[test]
    fn test_validate_ping_without_data() {
        assert!(Envelope::ping().validate().is_ok());
        let mut ping = Envelope::ping();
        ping.data = Some(json!(1));
        assert!(matches!(ping.validate(), Err(CodecError::PingWithData)));
    }

    #[test]
    fn test_server_kinds_need_no_channel() {
        assert!(Envelope::pong().validate().is_ok());
        assert!(Envelope::error("boom").validate().is_ok());
        assert!(Envelope::connected("c-1", "u-1").validate().is_ok());
    }
}
