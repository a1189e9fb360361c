//! Connection Manager
//!
//! One background task owns the transport for the whole session. Public
//! calls reach it as [`Command`]s over an unbounded queue, so the task is
//! the single mutation point for connection state. It drives:
//!
//! - the `disconnected → connecting → connected → error` state machine
//! - the handshake (transport open + `connected` envelope) under a timeout
//! - re-announcement of every live channel before inbound frames are read
//! - heartbeat pings with a grace window for inbound traffic
//! - reconnection with exponential backoff up to an attempt limit

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::backoff::ReconnectPolicy;
use super::credentials::SessionCredentials;
use super::error::{ClientError, ClientResult};
use super::events::{ClientEvent, ConnectionState};
use super::registry::{self, SharedRegistry};
use super::stats::StatsTracker;
use super::transport::{session_url, Connector, Link, TransportError};
use crate::config::ClientConfig;
use crate::protocol::{codec, Channel, Envelope, MessageType};

/// Credentials slot shared with the facade
pub(crate) type SharedCredentials = Arc<RwLock<Option<SessionCredentials>>>;

/// Requests from the public API to the connection task
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    /// A channel gained its first subscription
    Announce(Channel),
    /// A channel lost its last subscription
    Withdraw(Channel),
    Publish(Envelope),
    Shutdown,
}

/// Collaborators the connection task needs
pub(crate) struct ConnectionParts {
    pub config: ClientConfig,
    pub connector: Arc<dyn Connector>,
    pub credentials: SharedCredentials,
    pub registry: SharedRegistry,
    pub stats: Arc<StatsTracker>,
    pub events: broadcast::Sender<ClientEvent>,
    pub dispatch: mpsc::UnboundedSender<Envelope>,
}

/// Handle to the running connection task
pub(crate) struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    _task: JoinHandle<()>,
}

impl ConnectionManager {
    pub fn spawn(parts: ConnectionParts) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let task = ConnectionTask {
            policy: ReconnectPolicy::from_config(&parts.config),
            config: parts.config,
            connector: parts.connector,
            credentials: parts.credentials,
            registry: parts.registry,
            stats: parts.stats,
            events: parts.events,
            dispatch: parts.dispatch,
            state_tx,
            cmd_rx,
            waiters: Vec::new(),
            announced: HashSet::new(),
            attempts: 0,
        };

        Self {
            cmd_tx,
            state_rx,
            _task: tokio::spawn(task.run()),
        }
    }

    /// Queue a command; false once the task has stopped
    pub fn command(&self, command: Command) -> bool {
        self.cmd_tx.send(command).is_ok()
    }

    pub fn commands(&self) -> mpsc::UnboundedSender<Command> {
        self.cmd_tx.clone()
    }

    pub async fn connect(&self) -> ClientResult<()> {
        let (reply, rx) = oneshot::channel();
        if !self.command(Command::Connect { reply }) {
            return Err(ClientError::Closed);
        }
        rx.await.unwrap_or(Err(ClientError::Closed))
    }

    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.command(Command::Disconnect { reply }) {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

enum Phase {
    Idle,
    Connecting,
    Live(Box<dyn Link>),
    Waiting(Duration),
    Stopped,
}

enum HandshakeFailure {
    Transport(String),
    Timeout(Duration),
    Rejected(String),
}

struct ConnectionTask {
    config: ClientConfig,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    credentials: SharedCredentials,
    registry: SharedRegistry,
    stats: Arc<StatsTracker>,
    events: broadcast::Sender<ClientEvent>,
    dispatch: mpsc::UnboundedSender<Envelope>,
    state_tx: watch::Sender<ConnectionState>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    /// Callers suspended in `connect()`
    waiters: Vec<oneshot::Sender<ClientResult<()>>>,
    /// Channels subscribed on the current transport
    announced: HashSet<Channel>,
    /// Failed reconnect attempts since the last successful handshake
    attempts: u32,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.handshake().await,
                Phase::Live(link) => self.live(link).await,
                Phase::Waiting(delay) => self.wait(delay).await,
                Phase::Stopped => break,
            };
        }

        self.fail_waiters(ClientError::Closed);
        tracing::debug!("Connection task stopped");
    }

    async fn idle(&mut self) -> Phase {
        let Some(command) = self.cmd_rx.recv().await else {
            return Phase::Stopped;
        };

        match command {
            Command::Connect { reply } => {
                if !self.has_credentials() {
                    let _ = reply.send(Err(ClientError::AuthenticationRequired));
                    return Phase::Idle;
                }
                self.reset_attempts();
                self.waiters.push(reply);
                Phase::Connecting
            }
            Command::Disconnect { reply } => {
                self.reset_attempts();
                self.set_state(ConnectionState::Disconnected);
                let _ = reply.send(());
                Phase::Idle
            }
            Command::Announce(_) | Command::Withdraw(_) => Phase::Idle,
            Command::Publish(envelope) => {
                self.drop_outbound(&envelope);
                Phase::Idle
            }
            Command::Shutdown => Phase::Stopped,
        }
    }

    async fn handshake(&mut self) -> Phase {
        let credentials = self
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(SessionCredentials::is_valid);

        let Some(credentials) = credentials else {
            self.on_rejected("no valid session token".to_string(), ClientError::AuthenticationRequired);
            return Phase::Idle;
        };

        self.set_state(ConnectionState::Connecting);
        tracing::debug!(url = %self.config.url, attempt = self.attempts, "Opening transport");

        let attempt = open_and_greet(
            Arc::clone(&self.connector),
            session_url(&self.config.url, &credentials),
            self.config.handshake_timeout(),
        );
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                outcome = &mut attempt => return self.after_handshake(outcome).await,
                command = self.cmd_rx.recv() => match command {
                    Some(Command::Connect { reply }) => self.waiters.push(reply),
                    Some(Command::Disconnect { reply }) => {
                        tracing::info!("Disconnect requested during handshake");
                        self.fail_waiters(ClientError::Cancelled);
                        self.reset_attempts();
                        self.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(());
                        return Phase::Idle;
                    }
                    Some(Command::Announce(_)) | Some(Command::Withdraw(_)) => {}
                    Some(Command::Publish(envelope)) => self.drop_outbound(&envelope),
                    Some(Command::Shutdown) | None => {
                        self.fail_waiters(ClientError::Cancelled);
                        return Phase::Stopped;
                    }
                },
            }
        }
    }

    async fn after_handshake(
        &mut self,
        outcome: Result<Box<dyn Link>, HandshakeFailure>,
    ) -> Phase {
        match outcome {
            Ok(link) => self.on_established(link).await,
            Err(HandshakeFailure::Rejected(message)) => {
                self.on_rejected(message.clone(), ClientError::Authentication(message));
                Phase::Idle
            }
            Err(HandshakeFailure::Timeout(after)) => {
                tracing::warn!(timeout_ms = after.as_millis() as u64, "Handshake timed out");
                let next = self.on_transport_lost();
                self.fail_waiters(ClientError::HandshakeTimeout(after));
                next
            }
            Err(HandshakeFailure::Transport(reason)) => {
                tracing::warn!(reason = %reason, "Connection attempt failed");
                let next = self.on_transport_lost();
                self.fail_waiters(ClientError::Transport(reason));
                next
            }
        }
    }

    /// Re-announce live channels, then report success to waiting callers
    async fn on_established(&mut self, mut link: Box<dyn Link>) -> Phase {
        self.announced.clear();
        let channels = registry::lock(&self.registry).channels();

        for channel in channels {
            if let Err(e) = self.write(link.as_mut(), &Envelope::subscribe(channel)).await {
                tracing::warn!(error = %e, "Failed to re-announce subscriptions");
                self.fail_waiters(e.into());
                link.close().await;
                return self.on_transport_lost();
            }
            self.announced.insert(channel);
        }

        self.attempts = 0;
        self.stats.record_connected();
        self.set_state(ConnectionState::Connected);
        self.emit(ClientEvent::Connected);
        tracing::info!(channels = self.announced.len(), "Real-time connection established");

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }

        Phase::Live(link)
    }

    async fn live(&mut self, mut link: Box<dyn Link>) -> Phase {
        let interval = self.config.heartbeat_interval();
        let grace = self.config.heartbeat_timeout();
        let mut ping_at = Instant::now() + interval;
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let ping_sleep = time::sleep_until(ping_at);
            let pong_sleep = time::sleep_until(pong_deadline.unwrap_or(ping_at));

            tokio::select! {
                biased;

                _ = pong_sleep, if pong_deadline.is_some() => {
                    tracing::warn!(grace_ms = grace.as_millis() as u64, "Heartbeat timed out");
                    link.close().await;
                    self.stats.record_disconnected();
                    return self.on_transport_lost();
                }

                command = self.cmd_rx.recv() => {
                    let outcome = match command {
                        Some(Command::Connect { reply }) => {
                            let _ = reply.send(Ok(()));
                            Ok(())
                        }
                        Some(Command::Disconnect { reply }) => {
                            link.close().await;
                            self.stats.record_disconnected();
                            self.announced.clear();
                            self.reset_attempts();
                            self.set_state(ConnectionState::Disconnected);
                            tracing::info!("Disconnected");
                            let _ = reply.send(());
                            return Phase::Idle;
                        }
                        Some(Command::Announce(channel)) => self.announce(link.as_mut(), channel).await,
                        Some(Command::Withdraw(channel)) => self.withdraw(link.as_mut(), channel).await,
                        Some(Command::Publish(envelope)) => {
                            let result = self.write(link.as_mut(), &envelope).await;
                            if result.is_ok() {
                                self.stats.record_sent();
                            }
                            result
                        }
                        Some(Command::Shutdown) | None => {
                            link.close().await;
                            self.set_state(ConnectionState::Disconnected);
                            return Phase::Stopped;
                        }
                    };

                    if let Err(e) = outcome {
                        return self.on_link_failed(e);
                    }
                }

                _ = ping_sleep, if pong_deadline.is_none() => {
                    if let Err(e) = self.write(link.as_mut(), &Envelope::ping()).await {
                        return self.on_link_failed(e);
                    }
                    pong_deadline = Some(Instant::now() + grace);
                    ping_at = Instant::now() + interval;
                }

                frame = link.recv() => {
                    // Any inbound traffic proves liveness
                    pong_deadline = None;
                    ping_at = Instant::now() + interval;

                    match frame {
                        Some(Ok(text)) => {
                            if let Some(next) = self.on_frame(&text, link.as_mut()).await {
                                return next;
                            }
                        }
                        Some(Err(e)) => return self.on_link_failed(e),
                        None => {
                            tracing::info!("Connection closed by server");
                            self.stats.record_disconnected();
                            return self.on_transport_lost();
                        }
                    }
                }
            }
        }
    }

    async fn wait(&mut self, delay: Duration) -> Phase {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Phase::Connecting,
                command = self.cmd_rx.recv() => match command {
                    Some(Command::Connect { reply }) => {
                        // Explicit connect skips the remaining delay
                        self.reset_attempts();
                        self.waiters.push(reply);
                        return Phase::Connecting;
                    }
                    Some(Command::Disconnect { reply }) => {
                        self.reset_attempts();
                        self.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(());
                        return Phase::Idle;
                    }
                    Some(Command::Announce(_)) | Some(Command::Withdraw(_)) => {}
                    Some(Command::Publish(envelope)) => self.drop_outbound(&envelope),
                    Some(Command::Shutdown) | None => return Phase::Stopped,
                },
            }
        }
    }

    /// Handle one inbound text frame; `Some` ends the live phase
    async fn on_frame(&mut self, text: &str, link: &mut dyn Link) -> Option<Phase> {
        self.trace_frame("in", text);

        let envelope = match codec::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding undecodable frame");
                return None;
            }
        };

        if envelope.kind.is_business() {
            self.stats.record_received();
            if self.dispatch.send(envelope).is_err() {
                tracing::debug!("Dispatcher stopped; dropping inbound envelope");
            }
            return None;
        }

        match envelope.kind {
            MessageType::MessageSent => self.emit(ClientEvent::MessageSent {
                channel: envelope.channel,
                recipient_count: envelope.recipient_count.unwrap_or(0),
            }),
            MessageType::BroadcastSent => self.emit(ClientEvent::BroadcastSent {
                channel: envelope.channel,
                subscriber_count: envelope.subscriber_count.unwrap_or(0),
            }),
            MessageType::Subscribed => {
                if let Some(channel) = envelope.channel {
                    tracing::debug!(channel = %channel, "Subscription acknowledged");
                    self.emit(ClientEvent::Subscribed { channel });
                }
            }
            MessageType::Unsubscribed => {
                if let Some(channel) = envelope.channel {
                    self.emit(ClientEvent::Unsubscribed { channel });
                }
            }
            MessageType::Ping => {
                if let Err(e) = self.write(link, &Envelope::pong()).await {
                    return Some(self.on_link_failed(e));
                }
            }
            MessageType::Pong => tracing::trace!("Heartbeat acknowledged"),
            MessageType::Error => {
                let message = envelope
                    .error
                    .unwrap_or_else(|| "unspecified server error".to_string());
                tracing::warn!(error = %message, "Server reported an error");
                self.emit(ClientEvent::ServerError { message });
            }
            MessageType::AuthError => {
                let message = envelope
                    .error
                    .unwrap_or_else(|| "authentication rejected".to_string());
                link.close().await;
                self.stats.record_disconnected();
                self.on_rejected(message.clone(), ClientError::Authentication(message));
                return Some(Phase::Idle);
            }
            kind => tracing::debug!(kind = ?kind, "Ignoring unexpected envelope"),
        }

        None
    }

    async fn announce(&mut self, link: &mut dyn Link, channel: Channel) -> Result<(), TransportError> {
        let wanted = registry::lock(&self.registry).count(channel) > 0;
        if wanted && !self.announced.contains(&channel) {
            self.write(link, &Envelope::subscribe(channel)).await?;
            self.announced.insert(channel);
        }
        Ok(())
    }

    async fn withdraw(&mut self, link: &mut dyn Link, channel: Channel) -> Result<(), TransportError> {
        let still_wanted = registry::lock(&self.registry).count(channel) > 0;
        if !still_wanted && self.announced.remove(&channel) {
            self.write(link, &Envelope::unsubscribe(channel)).await?;
        }
        Ok(())
    }

    async fn write(&self, link: &mut dyn Link, envelope: &Envelope) -> Result<(), TransportError> {
        let text = match codec::encode(envelope) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping invalid outbound envelope");
                return Ok(());
            }
        };
        self.trace_frame("out", &text);
        link.send(text).await
    }

    fn on_link_failed(&mut self, error: TransportError) -> Phase {
        tracing::warn!(error = %error, "Transport failed");
        self.stats.record_disconnected();
        self.on_transport_lost()
    }

    /// Enter `error` and decide whether and when to retry
    fn on_transport_lost(&mut self) -> Phase {
        self.announced.clear();
        self.set_state(ConnectionState::Error);

        if !self.policy.enabled {
            return Phase::Idle;
        }

        if !self.policy.allows(self.attempts) {
            let attempts = self.attempts;
            tracing::warn!(attempts, "Maximum reconnection attempts reached");
            self.set_state(ConnectionState::Disconnected);
            self.emit(ClientEvent::MaxReconnectExceeded { attempts });
            self.fail_waiters(ClientError::MaxReconnectExceeded(attempts));
            return Phase::Idle;
        }

        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        self.stats.set_reconnect_attempts(self.attempts);
        tracing::info!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        Phase::Waiting(delay)
    }

    /// Credentials missing or refused: terminal, no automatic retry
    fn on_rejected(&mut self, message: String, error: ClientError) {
        tracing::warn!(reason = %message, "Session authentication failed");
        self.announced.clear();
        self.reset_attempts();
        self.fail_waiters(error);
        self.set_state(ConnectionState::Disconnected);
        self.emit(ClientEvent::AuthError { message });
    }

    fn has_credentials(&self) -> bool {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(SessionCredentials::is_valid)
    }

    fn reset_attempts(&mut self) {
        self.attempts = 0;
        self.stats.set_reconnect_attempts(0);
    }

    fn fail_waiters(&mut self, error: ClientError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    fn drop_outbound(&self, envelope: &Envelope) {
        tracing::warn!(
            kind = ?envelope.kind,
            channel = ?envelope.channel,
            "Not connected; dropping outbound envelope"
        );
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::debug!(state = %state, "Connection state changed");
            self.emit(ClientEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ClientEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn trace_frame(&self, direction: &str, text: &str) {
        if self.config.debug {
            tracing::debug!(direction, frame = %text, "Frame");
        } else {
            tracing::trace!(direction, frame = %text, "Frame");
        }
    }
}

/// Open the transport and wait for the server's `connected` greeting
async fn open_and_greet(
    connector: Arc<dyn Connector>,
    url: String,
    timeout: Duration,
) -> Result<Box<dyn Link>, HandshakeFailure> {
    let greet = async {
        let mut link = connector
            .open(&url)
            .await
            .map_err(|e| HandshakeFailure::Transport(e.to_string()))?;

        loop {
            match link.recv().await {
                Some(Ok(text)) => match codec::decode(&text) {
                    Ok(envelope) if envelope.kind == MessageType::Connected => return Ok(link),
                    Ok(envelope) if envelope.kind == MessageType::AuthError => {
                        link.close().await;
                        return Err(HandshakeFailure::Rejected(
                            envelope
                                .error
                                .unwrap_or_else(|| "authentication rejected".to_string()),
                        ));
                    }
                    // e.g. the server is at its connection limit
                    Ok(envelope) if envelope.kind == MessageType::Error => {
                        link.close().await;
                        return Err(HandshakeFailure::Transport(
                            envelope
                                .error
                                .unwrap_or_else(|| "server refused the connection".to_string()),
                        ));
                    }
                    Ok(envelope) => {
                        tracing::trace!(kind = ?envelope.kind, "Ignoring envelope before handshake");
                    }
                    Err(e) => tracing::warn!(error = %e, "Undecodable frame during handshake"),
                },
                Some(Err(e)) => return Err(HandshakeFailure::Transport(e.to_string())),
                None => {
                    return Err(HandshakeFailure::Transport(
                        "connection closed during handshake".to_string(),
                    ))
                }
            }
        }
    };

    match time::timeout(timeout, greet).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeFailure::Timeout(timeout)),
    }
}
