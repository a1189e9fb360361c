//! Channel Routes
//!
//! - GET /api/v1/channels - Subscriber count per channel

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::{ChannelInfo, ChannelsResponse};
use crate::api::state::AppState;

/// GET /api/v1/channels
pub async fn list_channels(State(state): State<Arc<AppState>>) -> Json<ChannelsResponse> {
    let channels = state
        .hub
        .channel_counts()
        .await
        .into_iter()
        .map(|(name, subscriber_count)| ChannelInfo {
            name,
            subscriber_count,
        })
        .collect();

    Json(ChannelsResponse {
        channels,
        connections: state.connection_count().await,
    })
}
