//! Wire Codec
//!
//! Envelopes travel as JSON text frames. Encoding enforces the outbound
//! invariants; decoding rejects unknown kinds and channels.

use thiserror::Error;

use super::envelope::{Envelope, MessageType};

/// Errors produced while encoding or decoding envelopes
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Envelope of type {0:?} must carry a channel")]
    MissingChannel(MessageType),

    #[error("Ping envelopes must not carry data")]
    PingWithData,

    #[error("Invalid envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serialize an envelope to a text frame
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    envelope.validate()?;
    Ok(serde_json::to_string(envelope)?)
}

/// Parse a text frame into an envelope
pub fn decode(text: &str) -> Result<Envelope, CodecError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Channel;
    use serde_json::json;

    #[test]
    fn test_encode_rejects_invalid() {
        let mut env = Envelope::subscribe(Channel::Alerts);
        env.channel = None;
        assert!(matches!(encode(&env), Err(CodecError::MissingChannel(_))));
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = decode(r#"{"type":"shout"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_decode_unknown_channel() {
        assert!(decode(r#"{"type":"subscribe","channel":"metrics"}"#).is_err());
    }

    #[test]
    fn test_decode_not_json() {
        assert!(decode("not json").is_err());
    }

    #[test]
    fn test_encode_then_decode_message() {
        let env = Envelope::message(Channel::Notifications, json!({"id": 7}), None);
        let decoded = decode(&encode(&env).unwrap()).unwrap();
        assert_eq!(decoded, env);
    }
}
