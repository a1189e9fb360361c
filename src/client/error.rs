//! Client error types

use std::time::Duration;
use thiserror::Error;

use super::transport::TransportError;

/// Errors surfaced to callers of the real-time client
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// No usable session token is available
    #[error("Authentication required: no valid session token")]
    AuthenticationRequired,

    /// The server rejected the session credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Connection refused or closed; retried with backoff
    #[error("Transport error: {0}")]
    Transport(String),

    /// No `connected` envelope within the handshake window
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Reconnection gave up; a fresh `connect()` starts over
    #[error("Maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectExceeded(u32),

    /// A pending connect was abandoned by `disconnect()`
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// The connection task is no longer running
    #[error("Client has shut down")]
    Closed,
}

impl ClientError {
    /// Fatal errors end the session; the caller must act before `connect()` again
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::AuthenticationRequired
                | ClientError::Authentication(_)
                | ClientError::MaxReconnectExceeded(_)
                | ClientError::Closed
        )
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
