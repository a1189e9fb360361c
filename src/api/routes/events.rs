//! Push Stream Route
//!
//! - GET /events?token=&userId= - Server-sent events fallback

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures_util::{Stream, StreamExt};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::server::SessionQuery;

/// GET /events
///
/// The stream ends, and its heartbeat timer is released, when the client
/// disconnects and axum drops the response body.
pub async fn push_stream(
    Query(session): Query<SessionQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let identity = state.authenticator.verify_query(&session)?;
    tracing::info!(user_id = %identity.user_id, "Push stream requested");

    let stream = state
        .push
        .open()
        .map(|event| Event::default().json_data(event));

    Ok(Sse::new(stream))
}
