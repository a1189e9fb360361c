//! Switchboard HTTP Surface
//!
//! HTTP and WebSocket layer, built with Axum.
//!
//! # Endpoints
//!
//! ## Real-time
//! - `GET /ws?token=&userId=` - Bidirectional envelope protocol
//! - `GET /events?token=&userId=` - Push stream (server-sent events)
//!
//! ## Publish
//! - `POST /api/v1/publish` - Server-originated event to a channel
//! - `GET /api/v1/channels` - Subscriber count per channel
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,no_run
//! use switchboard::api::{serve, AppState};
//! use switchboard::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let state = AppState::new(&config);
//!     serve(state, &config.server.addr()).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::server::websocket_handler;

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/publish", post(routes::publish::publish))
        .route("/channels", get(routes::channels::list_channels));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/", get(routes::health::full_health));

    let shared_state = Arc::new(state);

    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/events", get(routes::events::push_stream))
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Bind `addr` and serve until Ctrl+C or SIGTERM
pub async fn serve(state: AppState, addr: &str) -> Result<(), ApiError> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Switchboard listening on {}", addr);

    serve_with_shutdown(listener, state, shutdown_signal()).await?;

    tracing::info!("Switchboard shut down gracefully");
    Ok(())
}

/// Serve on an already bound listener until `signal` completes
pub async fn serve_with_shutdown<F>(listener: TcpListener, state: AppState, signal: F) -> Result<(), ApiError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dto::{ChannelsResponse, HealthResponse, PublishResponse};
    use crate::client::{ClientEvent, RealtimeClient, SessionCredentials};
    use crate::config::{ClientConfig, ServerConfig};
    use crate::protocol::{codec, Channel, Envelope, MessageType};
    use crate::server::Authenticator;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};
    use tokio_tungstenite::tungstenite::protocol::Message;
    use tower::util::ServiceExt;

    fn test_state() -> AppState {
        AppState::with_authenticator(
            ServerConfig::default(),
            Authenticator::new(&Default::default())
                .with_token("instructor-token", "instructor-1")
                .with_token("student-token", "student-1"),
        )
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_live() {
        let app = build_router(test_state());

        let response = app
            .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_full() {
        let app = build_router(test_state());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = body_json(response).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.connections, 0);
        assert_eq!(health.push_streams, 0);
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_list_channels() {
        let app = build_router(test_state());

        let response = app
            .oneshot(Request::builder().uri("/api/v1/channels").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let channels: ChannelsResponse = body_json(response).await;
        assert_eq!(channels.channels.len(), Channel::ALL.len());
        assert!(channels.channels.iter().all(|c| c.subscriber_count == 0));
    }

    #[tokio::test]
    async fn test_publish_reaches_push_streams() {
        let state = test_state();
        let mut stream = state.push.open();
        stream.next_event().await.unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/publish")
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        r#"{"channel": "updates", "data": {"table": "attendance"}, "event": "ROW_CHANGED"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let published: PublishResponse = body_json(response).await;
        assert_eq!(published.channel, Channel::Updates);
        assert_eq!(published.subscriber_count, 0);
        assert_eq!(published.push_streams, 1);

        let event = stream.next_event().await.unwrap();
        assert_eq!(event.kind, "ROW_CHANGED");
        assert_eq!(event.data, Some(json!({"table": "attendance"})));
    }

    #[tokio::test]
    async fn test_publish_unknown_channel() {
        let app = build_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/publish")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"channel": "gossip", "data": {}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_publish_invalid_json() {
        let app = build_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/publish")
                    .header("Content-Type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_events_requires_token() {
        let app = build_router(test_state());

        let response = app
            .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_events_stream_starts_with_connected() {
        let app = build_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/events?token=instructor-token&userId=instructor-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );

        let mut body = response.into_body().into_data_stream();
        let chunk = body.next().await.unwrap().unwrap();
        let frame = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(frame.starts_with("data: {"));
        assert!(frame.contains(r#""type":"CONNECTED""#));
        assert!(frame.ends_with("\n\n"));
    }

    // ---------------------------------------------------------------
    // End to end over a real socket
    // ---------------------------------------------------------------

    struct TestServer {
        addr: SocketAddr,
        state: AppState,
        _shutdown: oneshot::Sender<()>,
    }

    async fn start_server() -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = test_state();
        let (shutdown, signal) = oneshot::channel::<()>();

        tokio::spawn(serve_with_shutdown(listener, state.clone(), async {
            let _ = signal.await;
        }));

        TestServer {
            addr,
            state,
            _shutdown: shutdown,
        }
    }

    fn client_for(server: &TestServer, token: &str, user: &str) -> RealtimeClient {
        let config = ClientConfig {
            reconnect: false,
            handshake_timeout_ms: 5_000,
            ..ClientConfig::new(format!("ws://{}/ws", server.addr))
        };
        let client = RealtimeClient::new(config);
        client.set_credentials(SessionCredentials::new(token).user(user));
        client
    }

    async fn wait_for_subscribers(server: &TestServer, channel: Channel, n: usize) {
        for _ in 0..200 {
            if server.state.hub.subscriber_count(channel).await == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("channel {} never reached {} subscribers", channel, n);
    }

    #[tokio::test]
    async fn test_e2e_broadcast_between_clients() {
        let server = start_server().await;
        let instructor = client_for(&server, "instructor-token", "instructor-1");
        let student = client_for(&server, "student-token", "student-1");

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let _sub = student.subscribe(Channel::Alerts, move |envelope| {
            seen_tx.send(envelope.clone())?;
            Ok(())
        });

        instructor.connect().await.unwrap();
        student.connect().await.unwrap();
        wait_for_subscribers(&server, Channel::Alerts, 1).await;

        let mut events = instructor.events();
        instructor.broadcast(Channel::Alerts, json!({"severity": "high"}));

        let received = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.kind, MessageType::Broadcast);
        assert_eq!(received.from.as_deref(), Some("instructor-1"));
        assert_eq!(received.data, Some(json!({"severity": "high"})));

        let ack = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let ClientEvent::BroadcastSent { subscriber_count, .. } = events.recv().await.unwrap() {
                    return subscriber_count;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(ack, 1);
        assert_eq!(instructor.stats().messages_sent, 1);
        assert_eq!(student.stats().messages_received, 1);
    }

    #[tokio::test]
    async fn test_e2e_bad_token_is_rejected() {
        let server = start_server().await;
        let client = client_for(&server, "wrong", "instructor-1");

        let result = client.connect().await;
        assert!(matches!(result, Err(crate::client::ClientError::Authentication(_))));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_e2e_raw_socket_protocol() {
        let server = start_server().await;
        let url = format!("ws://{}/ws?token=instructor-token&userId=instructor-1", server.addr);
        let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        async fn next(socket: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin)) -> Envelope {
            loop {
                match socket.next().await.unwrap().unwrap() {
                    Message::Text(text) => return codec::decode(&text).unwrap(),
                    _ => continue,
                }
            }
        }

        let greeting = next(&mut socket).await;
        assert_eq!(greeting.kind, MessageType::Connected);
        assert_eq!(greeting.data.unwrap()["userId"], "instructor-1");

        let subscribe = codec::encode(&Envelope::subscribe(Channel::Messages)).unwrap();
        socket.send(Message::Text(subscribe)).await.unwrap();
        let ack = next(&mut socket).await;
        assert_eq!(ack.kind, MessageType::Subscribed);
        assert_eq!(ack.subscriber_count, Some(1));

        // Untargeted message skips the sender
        let message = codec::encode(&Envelope::message(Channel::Messages, json!({"t": 1}), None)).unwrap();
        socket.send(Message::Text(message)).await.unwrap();
        let ack = next(&mut socket).await;
        assert_eq!(ack.kind, MessageType::MessageSent);
        assert_eq!(ack.recipient_count, Some(0));

        // Targeted message to an absent user
        let direct = codec::encode(&Envelope::message(
            Channel::Messages,
            json!({"t": 2}),
            Some("student-1".into()),
        ))
        .unwrap();
        socket.send(Message::Text(direct)).await.unwrap();
        assert_eq!(next(&mut socket).await.recipient_count, Some(0));

        socket.send(Message::Text("{\"type\":\"subscribe\"}".into())).await.unwrap();
        let error = next(&mut socket).await;
        assert_eq!(error.kind, MessageType::Error);

        socket.send(Message::Text(codec::encode(&Envelope::ping()).unwrap())).await.unwrap();
        assert_eq!(next(&mut socket).await.kind, MessageType::Pong);
    }
}
