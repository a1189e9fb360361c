//! In-memory transport for exercising the client without a server

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use super::credentials::SessionCredentials;
use super::events::{ClientEvent, ConnectionState};
use super::facade::RealtimeClient;
use super::transport::{Connector, Link, TransportError};
use crate::config::ClientConfig;
use crate::protocol::{codec, Envelope};

/// Hands each opened link's server side to the test as a [`MockPeer`]
pub(crate) struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    refuse_next: AtomicUsize,
    opens: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers,
            refuse_next: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    /// Refuse the next `n` open attempts
    pub fn refuse(&self, n: usize) {
        self.refuse_next.store(n, Ordering::SeqCst);
    }

    /// Total open attempts, refused ones included
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Link>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let peer = MockPeer {
            url: url.to_string(),
            tx: to_client,
            rx: from_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Connect("no mock server".to_string()))?;

        Ok(Box::new(MockLink {
            inbound,
            outbound,
            closed: false,
        }))
    }
}

/// Server side of one mock link; dropping it closes the link
pub(crate) struct MockPeer {
    pub url: String,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    pub fn push(&self, envelope: &Envelope) {
        let _ = self.tx.send(serde_json::to_string(envelope).unwrap());
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.tx.send(text.to_string());
    }

    /// Complete the handshake
    pub fn accept(&self) {
        self.push(&Envelope::connected("conn-1", "user-1"));
    }

    /// Next envelope written by the client; `None` once it closed the link
    pub async fn next(&mut self) -> Option<Envelope> {
        let text = self.rx.recv().await?;
        Some(codec::decode(&text).unwrap())
    }

    /// Everything written so far, without waiting
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            out.push(codec::decode(&text).unwrap());
        }
        out
    }
}

struct MockLink {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
    closed: bool,
}

#[async_trait]
impl Link for MockLink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed = true;
        self.inbound.close();
    }
}

/// Short timings so paused-clock tests stay readable
pub(crate) fn fast_config() -> ClientConfig {
    ClientConfig {
        url: "ws://mock/ws".to_string(),
        reconnect_interval_ms: 100,
        reconnect_backoff: 2.0,
        max_reconnect_attempts: 3,
        max_reconnect_delay_ms: 1_000,
        heartbeat_interval_ms: 1_000,
        heartbeat_timeout_ms: 500,
        handshake_timeout_ms: 1_000,
        ..ClientConfig::default()
    }
}

pub(crate) fn mock_client(
    config: ClientConfig,
) -> (RealtimeClient, Arc<MockConnector>, mpsc::UnboundedReceiver<MockPeer>) {
    let (connector, peers) = MockConnector::new();
    let client = RealtimeClient::with_connector(config, connector.clone());
    client.set_credentials(SessionCredentials::new("token-1").user("user-1"));
    (client, connector, peers)
}

/// Connect and complete the handshake, returning the live peer
pub(crate) async fn connect_live(
    client: &RealtimeClient,
    peers: &mut mpsc::UnboundedReceiver<MockPeer>,
) -> MockPeer {
    let (result, peer) = tokio::join!(client.connect(), async {
        let peer = peers.recv().await.unwrap();
        peer.accept();
        peer
    });
    result.unwrap();
    peer
}

/// Wait for the first event satisfying `pred`
pub(crate) async fn next_event<F>(events: &mut broadcast::Receiver<ClientEvent>, pred: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(60), events.recv())
            .await
            .expect("timed out waiting for client event")
            .unwrap();
        if pred(&event) {
            return event;
        }
    }
}

pub(crate) async fn wait_for_state(client: &RealtimeClient, state: ConnectionState) {
    let mut rx = client.watch_state();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .unwrap();
}
