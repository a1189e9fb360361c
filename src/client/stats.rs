//! Connection statistics
//!
//! Counters and timestamps mutated by the connection task and read by
//! consumers through [`Stats`] snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::Channel;

/// Read-only view handed to consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_disconnected: Option<DateTime<Utc>>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub subscriptions: Vec<Channel>,
}

#[derive(Debug, Default)]
struct Counters {
    reconnect_attempts: u32,
    last_connected: Option<DateTime<Utc>>,
    last_disconnected: Option<DateTime<Utc>>,
    messages_sent: u64,
    messages_received: u64,
}

/// Shared, mutex-guarded stats state
#[derive(Debug, Default)]
pub struct StatsTracker {
    counters: Mutex<Counters>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_connected(&self) {
        let mut c = self.counters();
        c.last_connected = Some(Utc::now());
        c.reconnect_attempts = 0;
    }

    pub fn record_disconnected(&self) {
        self.counters().last_disconnected = Some(Utc::now());
    }

    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.counters().reconnect_attempts = attempts;
    }

    pub fn record_sent(&self) {
        self.counters().messages_sent += 1;
    }

    pub fn record_received(&self) {
        self.counters().messages_received += 1;
    }

    /// Combine the counters with live connection and registry state
    pub fn snapshot(&self, connected: bool, subscriptions: Vec<Channel>) -> Stats {
        let c = self.counters();
        Stats {
            connected,
            reconnect_attempts: c.reconnect_attempts,
            last_connected: c.last_connected,
            last_disconnected: c.last_disconnected,
            messages_sent: c.messages_sent,
            messages_received: c.messages_received,
            subscriptions,
        }
    }
}
