//! Health Routes
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health - Connection counts and uptime

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health
///
/// Reports `degraded` once the socket connection limit is reached.
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let connections = state.connection_count().await;
    let status = if connections >= state.config.max_connections {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        connections,
        push_streams: state.push.active_streams(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
