//! Transport seam
//!
//! The connection manager talks to the network only through [`Connector`]
//! and [`Link`]. [`WsConnector`] is the production implementation over
//! `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::credentials::SessionCredentials;

/// Connection refused, closed, or failed mid-stream
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Connection closed")]
    Closed,
}

/// Opens transport links
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<Box<dyn Link>, TransportError>;
}

/// One open bidirectional text transport
#[async_trait]
pub trait Link: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next text frame; `None` once the peer has closed the link.
    /// Must be cancel-safe: it is polled inside `select!`.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}

/// Append the session credentials to the socket URL as query parameters
pub fn session_url(base: &str, credentials: &SessionCredentials) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{}{}token={}",
        base,
        separator,
        urlencoding::encode(&credentials.token)
    );
    if let Some(user_id) = &credentials.user_id {
        url.push_str("&userId=");
        url.push_str(&urlencoding::encode(user_id));
    }
    url
}

/// WebSocket connector backed by `tokio-tungstenite`
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Link>, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket transport open");
        Ok(Box::new(WsLink { stream }))
    }
}

struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Link for WsLink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Control frames are answered by tungstenite itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Binary(data)) => {
                    tracing::debug!(bytes = data.len(), "Ignoring binary frame");
                    continue;
                }
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::trace!(error = %e, "WebSocket close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url_encodes_credentials() {
        let creds = SessionCredentials::new("a b&c").user("instructor 1");
        assert_eq!(
            session_url("ws://localhost:8090/ws", &creds),
            "ws://localhost:8090/ws?token=a%20b%26c&userId=instructor%201"
        );
    }

    #[test]
    fn test_session_url_existing_query() {
        let creds = SessionCredentials::new("tok");
        assert_eq!(
            session_url("wss://host/ws?v=2", &creds),
            "wss://host/ws?v=2&token=tok"
        );
    }

    #[tokio::test]
    async fn test_ws_connector_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WsConnector.open(&format!("ws://{}/ws", addr)).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
