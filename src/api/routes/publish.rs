//! Publish Routes
//!
//! - POST /api/v1/publish - Fan a server-originated event out to socket
//!   subscribers and every open push stream

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::{PublishRequest, PublishResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::protocol::{Channel, Envelope};
use crate::server::ChangeEvent;

/// Sender id stamped on server-originated broadcasts
const SERVER_SENDER: &str = "server";

/// POST /api/v1/publish
pub async fn publish(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PublishRequest>,
) -> ApiResult<Json<PublishResponse>> {
    let channel: Channel = request
        .channel
        .parse()
        .map_err(|e: crate::protocol::UnknownChannel| ApiError::Validation(e.to_string()))?;

    let mut change = ChangeEvent::new(Some(channel), request.data.clone());
    if let Some(kind) = request.event {
        let kind = kind.trim();
        if kind.is_empty() {
            return Err(ApiError::Validation("Event type cannot be empty".to_string()));
        }
        change = change.kind(kind);
    }

    let envelope = Envelope::broadcast(channel, request.data).with_from(SERVER_SENDER);
    let subscriber_count = state.hub.broadcast(channel, &envelope, None).await;
    let push_streams = state.push.publish(change);

    tracing::info!(
        channel = %channel,
        subscribers = subscriber_count,
        push_streams,
        "Published event"
    );

    Ok(Json(PublishResponse {
        channel,
        subscriber_count,
        push_streams,
    }))
}
