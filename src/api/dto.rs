//! Data Transfer Objects
//!
//! Request and response types for the HTTP endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::Channel;

// ============================================
// PUBLISH DTOs
// ============================================

/// Server-originated event for sockets and push streams
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Channel name, e.g. "alerts"
    pub channel: String,
    #[serde(default)]
    pub data: Value,
    /// Push-stream event type; defaults to "CHANGE"
    #[serde(default)]
    pub event: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub channel: Channel,
    /// Socket subscribers reached
    pub subscriber_count: usize,
    /// Push streams the change was forwarded to
    pub push_streams: usize,
}

// ============================================
// CHANNEL DTOs
// ============================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub name: Channel,
    pub subscriber_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelsResponse {
    pub channels: Vec<ChannelInfo>,
    pub connections: usize,
}

// ============================================
// HEALTH DTOs
// ============================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    pub connections: usize,
    pub push_streams: usize,
    pub uptime_seconds: u64,
    pub version: String,
}
