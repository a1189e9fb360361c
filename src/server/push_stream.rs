//! Push-Stream Bridge
//!
//! One-way delivery for clients that cannot hold a socket open. Each open
//! stream gets `CONNECTED` immediately, a `HEARTBEAT` every interval, and
//! every change published to the bridge. A stream's pump task and its
//! heartbeat timer end as soon as the consumer goes away or its
//! cancellation token fires.

use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::ServerConfig;
use crate::protocol::Channel;

const CHANGE_CAPACITY: usize = 256;

/// An externally triggered domain event, e.g. a row change
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Event type on the stream; `CHANGE` when unspecified
    pub kind: String,
    pub channel: Option<Channel>,
    pub data: Value,
}

impl ChangeEvent {
    pub fn new(channel: Option<Channel>, data: Value) -> Self {
        Self {
            kind: "CHANGE".to_string(),
            channel,
            data,
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

/// One event on the stream, in the envelope shape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl PushEvent {
    pub fn connected() -> Self {
        Self::bare("CONNECTED")
    }

    pub fn heartbeat() -> Self {
        Self::bare("HEARTBEAT")
    }

    fn bare(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            channel: None,
            data: None,
            timestamp: Utc::now(),
        }
    }
}

impl From<ChangeEvent> for PushEvent {
    fn from(change: ChangeEvent) -> Self {
        Self {
            kind: change.kind,
            channel: change.channel,
            data: Some(change.data),
            timestamp: Utc::now(),
        }
    }
}

/// Stream settings
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub heartbeat_interval: Duration,
    /// Events queued per stream before new ones are dropped
    pub buffer: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for PushConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat_interval: config.push_heartbeat_interval(),
            buffer: config.push_buffer.max(1),
        }
    }
}

/// Fans change events out to every open push stream
pub struct PushStreamBridge {
    config: PushConfig,
    changes: broadcast::Sender<ChangeEvent>,
    active: Arc<AtomicUsize>,
}

impl PushStreamBridge {
    pub fn new(mut config: PushConfig) -> Self {
        if config.heartbeat_interval.is_zero() {
            tracing::warn!("Push heartbeat interval is zero; using the default");
            config.heartbeat_interval = PushConfig::default().heartbeat_interval;
        }
        config.buffer = config.buffer.max(1);

        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            config,
            changes,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Forward a change into every open stream; returns how many streams will see it
    pub fn publish(&self, change: ChangeEvent) -> usize {
        self.changes.send(change).unwrap_or(0)
    }

    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Open a stream that ends when dropped
    pub fn open(&self) -> PushStream {
        self.open_until(CancellationToken::new())
    }

    /// Open a stream that also ends when `cancel` fires
    pub fn open_until(&self, cancel: CancellationToken) -> PushStream {
        let (tx, rx) = mpsc::channel(self.config.buffer);
        let guard = ActiveGuard::new(Arc::clone(&self.active));

        tokio::spawn(pump(
            tx,
            self.changes.subscribe(),
            self.config.heartbeat_interval,
            cancel.clone(),
            guard,
        ));

        PushStream {
            rx,
            _cancel_on_drop: cancel.drop_guard(),
        }
    }
}

/// Consumer side of one push stream
pub struct PushStream {
    rx: mpsc::Receiver<PushEvent>,
    _cancel_on_drop: DropGuard,
}

impl PushStream {
    pub async fn next_event(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }
}

impl Stream for PushStream {
    type Item = PushEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<PushEvent>> {
        self.rx.poll_recv(cx)
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        let open = active.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(open, "Push stream opened");
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let open = self.0.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        tracing::debug!(open, "Push stream closed");
    }
}

async fn pump(
    tx: mpsc::Sender<PushEvent>,
    mut changes: broadcast::Receiver<ChangeEvent>,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
    _guard: ActiveGuard,
) {
    if !offer(&tx, PushEvent::connected()) {
        return;
    }

    let mut heartbeat = time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = tx.closed() => break,

            _ = heartbeat.tick() => {
                if !offer(&tx, PushEvent::heartbeat()) {
                    break;
                }
            }

            change = changes.recv() => match change {
                Ok(change) => {
                    if !offer(&tx, change.into()) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Push stream lagged; changes dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Queue without waiting; false once the consumer is gone
fn offer(tx: &mpsc::Sender<PushEvent>, event: PushEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::warn!(kind = %event.kind, "Push stream full; event dropped");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge() -> PushStreamBridge {
        PushStreamBridge::new(PushConfig {
            heartbeat_interval: Duration::from_secs(30),
            buffer: 16,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_then_heartbeats() {
        let bridge = bridge();
        let mut stream = bridge.open();

        let first = stream.next_event().await.unwrap();
        assert_eq!(first.kind, "CONNECTED");

        let started = Instant::now();
        let beat = stream.next_event().await.unwrap();
        assert_eq!(beat.kind, "HEARTBEAT");
        assert_eq!(Instant::now() - started, Duration::from_secs(30));

        assert_eq!(stream.next_event().await.unwrap().kind, "HEARTBEAT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_are_forwarded() {
        let bridge = bridge();
        let mut a = bridge.open();
        let mut b = bridge.open();
        a.next_event().await.unwrap();
        b.next_event().await.unwrap();

        let delivered = bridge.publish(
            ChangeEvent::new(Some(Channel::Updates), json!({"table": "attendance", "id": 4}))
                .kind("ROW_CHANGED"),
        );
        assert_eq!(delivered, 2);

        let event = a.next_event().await.unwrap();
        assert_eq!(event.kind, "ROW_CHANGED");
        assert_eq!(event.channel, Some(Channel::Updates));
        assert_eq!(event.data, Some(json!({"table": "attendance", "id": 4})));
        assert_eq!(b.next_event().await.unwrap().kind, "ROW_CHANGED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_timer() {
        let bridge = bridge();
        let cancel = CancellationToken::new();
        let mut stream = bridge.open_until(cancel.clone());
        stream.next_event().await.unwrap();
        assert_eq!(bridge.active_streams(), 1);

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(bridge.active_streams(), 0);

        // No heartbeat after the abort; the stream just ends
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_ends_pump() {
        let bridge = bridge();
        let stream = bridge.open();
        assert_eq!(bridge.active_streams(), 1);

        drop(stream);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(bridge.active_streams(), 0);
        assert_eq!(bridge.publish(ChangeEvent::new(None, json!({}))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_forwards_changes() {
        let bridge = PushStreamBridge::new(PushConfig {
            heartbeat_interval: Duration::ZERO,
            buffer: 0,
        });
        let mut stream = bridge.open();
        assert_eq!(stream.next_event().await.unwrap().kind, "CONNECTED");

        assert_eq!(bridge.publish(ChangeEvent::new(Some(Channel::Alerts), json!({"n": 1}))), 1);
        assert_eq!(stream.next_event().await.unwrap().kind, "CHANGE");

        let started = Instant::now();
        assert_eq!(stream.next_event().await.unwrap().kind, "HEARTBEAT");
        assert_eq!(Instant::now() - started, Duration::from_secs(30));

        let server = ServerConfig {
            push_heartbeat_interval_ms: 0,
            ..ServerConfig::default()
        };
        assert_eq!(PushConfig::from(&server).heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_event_shape() {
        let json = serde_json::to_value(PushEvent::heartbeat()).unwrap();
        assert_eq!(json["type"], "HEARTBEAT");
        assert!(json.get("channel").is_none());
        assert!(json["timestamp"].is_string());
    }
}
