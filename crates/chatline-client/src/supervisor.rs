//! Owner of the realtime connection.
//!
//! A single task runs the state machine. It combines the three session
//! signals, opens and closes the transport, schedules reconnects, and
//! republishes decoded inbound events on a [`ReplayBus`]. Everything else
//! talks to it through a cloneable [`ConnectionHandle`].
//!
//! The bus is for observers and may skip events for a subscriber that falls
//! too far behind. The store writer gets its own bounded queue instead
//! ([`ConnectionSupervisor::spawn_with_feed`]); the supervisor waits for room
//! in it, so no event is lost.
//!
//! Open attempts and frame readers run in helper tasks that report back
//! over a channel, tagged with the generation they were started in. Each
//! teardown bumps the generation, so results from superseded attempts and
//! readers are discarded instead of being applied to the new link.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use chatline_net::{FrameSink, FrameSource, Incoming, RealtimeTransport, TransportError};
use chatline_shared::InboundEvent;

use crate::bus::{ReplayBus, Subscription};
use crate::classify::{classify, ConnectionFailure, ErrorClass};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::signals::SessionContext;
use crate::state::ConnectionState;

/// Published when the server rejects the current credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInvalidated {
    pub reason: String,
}

enum SupervisorCommand {
    Send {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

enum LinkEvent {
    Opened {
        generation: u64,
        sink: Box<dyn FrameSink>,
        source: Box<dyn FrameSource>,
    },
    OpenFailed {
        generation: u64,
        error: TransportError,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Heartbeat {
        generation: u64,
    },
    /// The reader stopped; `None` means the peer closed cleanly.
    Ended {
        generation: u64,
        error: Option<TransportError>,
    },
}

/// What the signals ask for.  Re-evaluated on every signal change and
/// ignored when identical to the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Intent {
    token: Option<String>,
    online: bool,
    foreground: bool,
}

enum Link {
    Idle,
    Opening(JoinHandle<()>),
    Open {
        sink: Box<dyn FrameSink>,
        reader: JoinHandle<()>,
    },
}

/// Cloneable access to a running supervisor.
#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<SupervisorCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    events: ReplayBus<InboundEvent>,
    invalidations: broadcast::Sender<SessionInvalidated>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that always holds the current state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Inbound events in arrival order, starting with the recent backlog.
    pub fn subscribe_events(&self) -> Subscription<InboundEvent> {
        self.events.subscribe()
    }

    pub fn session_invalidations(&self) -> broadcast::Receiver<SessionInvalidated> {
        self.invalidations.subscribe()
    }

    /// Write one frame on the live connection.
    ///
    /// Fails with [`ClientError::NotConnected`] without touching the
    /// transport unless the state is CONNECTED.  `Ok` means the transport
    /// accepted the write.
    pub async fn send_frame(&self, text: String) -> Result<()> {
        if !self.state().is_connected() {
            return Err(ClientError::NotConnected);
        }

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SupervisorCommand::Send { text, reply })
            .await
            .map_err(|_| ClientError::NotConnected)?;
        rx.await.map_err(|_| ClientError::NotConnected)?
    }

    /// Close the connection and stop the supervising task.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SupervisorCommand::Shutdown).await;
    }
}

pub struct ConnectionSupervisor {
    context: SessionContext,
    transport: Arc<dyn RealtimeTransport>,
    policy: RetryPolicy,
    config: ClientConfig,

    state_tx: watch::Sender<ConnectionState>,
    events: ReplayBus<InboundEvent>,
    invalidations: broadcast::Sender<SessionInvalidated>,
    link_tx: mpsc::Sender<LinkEvent>,
    feed: Option<mpsc::Sender<InboundEvent>>,

    intent: Option<Intent>,
    link: Link,
    generation: u64,
    attempt: u32,
    retry_at: Option<Instant>,
    ping_at: Option<Instant>,
    /// When the unanswered keep-alive ping went out.
    ping_sent: Option<Instant>,
    last_seen: Instant,
}

impl ConnectionSupervisor {
    /// Start the supervising task.
    pub fn spawn(
        context: SessionContext,
        transport: Arc<dyn RealtimeTransport>,
        config: ClientConfig,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        Self::start(context, transport, config, None)
    }

    /// Like [`spawn`](Self::spawn), additionally forwarding every decoded
    /// event into `feed` in arrival order.
    pub fn spawn_with_feed(
        context: SessionContext,
        transport: Arc<dyn RealtimeTransport>,
        config: ClientConfig,
        feed: mpsc::Sender<InboundEvent>,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        Self::start(context, transport, config, Some(feed))
    }

    fn start(
        context: SessionContext,
        transport: Arc<dyn RealtimeTransport>,
        config: ClientConfig,
        feed: Option<mpsc::Sender<InboundEvent>>,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (link_tx, link_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (invalidations, _) = broadcast::channel(16);
        let events = ReplayBus::new(config.replay_capacity);

        let handle = ConnectionHandle {
            cmd_tx,
            state_rx,
            events: events.clone(),
            invalidations: invalidations.clone(),
        };

        let supervisor = Self {
            context,
            transport,
            policy: RetryPolicy::new(config.retry.clone()),
            config,
            state_tx,
            events,
            invalidations,
            link_tx,
            feed,
            intent: None,
            link: Link::Idle,
            generation: 0,
            attempt: 0,
            retry_at: None,
            ping_at: None,
            ping_sent: None,
            last_seen: Instant::now(),
        };

        let task = tokio::spawn(supervisor.run(cmd_rx, link_rx));
        (handle, task)
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SupervisorCommand>,
        mut link_rx: mpsc::Receiver<LinkEvent>,
    ) {
        let mut credentials = self.context.credentials.subscribe();
        let mut connectivity = self.context.connectivity.subscribe();
        let mut foreground = self.context.foreground.subscribe();

        self.evaluate().await;

        loop {
            tokio::select! {
                Ok(()) = credentials.changed() => self.evaluate().await,
                Ok(()) = connectivity.changed() => self.evaluate().await,
                Ok(()) = foreground.changed() => self.evaluate().await,

                cmd = cmd_rx.recv() => match cmd {
                    Some(SupervisorCommand::Send { text, reply }) => {
                        let result = self.send(text).await;
                        let _ = reply.send(result);
                    }
                    Some(SupervisorCommand::Shutdown) => {
                        info!("Connection supervisor shutdown requested");
                        break;
                    }
                    None => {
                        info!("All connection handles dropped, shutting down");
                        break;
                    }
                },

                Some(event) = link_rx.recv() => self.on_link_event(event).await,

                _ = deadline(self.retry_at) => {
                    self.retry_at = None;
                    self.reconnect();
                }

                _ = deadline(self.ping_at) => self.keepalive().await,
            }
        }

        self.teardown().await;
        self.set_state(ConnectionState::Disconnected);
        info!("Connection supervisor stopped");
    }

    fn current_intent(&self) -> Intent {
        Intent {
            token: self.context.credentials.current().map(|c| c.token),
            online: self.context.connectivity.current(),
            foreground: self.context.foreground.current(),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Connection state changed");
        }
    }

    /// React to the latest combination of signals.
    async fn evaluate(&mut self) {
        let intent = self.current_intent();
        let previous = self.intent.replace(intent.clone());
        if previous.as_ref() == Some(&intent) {
            return;
        }

        let was_foreground = previous.as_ref().is_some_and(|p| p.foreground);
        if intent.foreground && !was_foreground {
            self.attempt = 0;
        }

        let Some(token) = intent.token else {
            self.teardown().await;
            self.attempt = 0;
            self.set_state(ConnectionState::Disconnected);
            return;
        };

        if !intent.foreground {
            self.teardown().await;
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        if !intent.online {
            self.teardown().await;
            self.set_state(ConnectionState::ErrorNetwork);
            return;
        }

        let token_changed = previous.and_then(|p| p.token).as_deref() != Some(token.as_str());
        if token_changed || !self.state().is_active() {
            self.teardown().await;
            self.open(token);
        }
    }

    /// Close whatever link exists and invalidate everything started for it.
    async fn teardown(&mut self) {
        self.generation += 1;
        self.retry_at = None;
        self.ping_at = None;
        self.ping_sent = None;

        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Idle => {}
            Link::Opening(attempt) => {
                debug!("Cancelling in-flight connection attempt");
                attempt.abort();
            }
            Link::Open { mut sink, reader } => {
                reader.abort();
                if timeout(self.config.send_timeout, sink.close()).await.is_err() {
                    debug!("Timed out closing connection");
                }
            }
        }
    }

    fn open(&mut self, token: String) {
        self.set_state(ConnectionState::Connecting);

        let generation = self.generation;
        let transport = self.transport.clone();
        let link_tx = self.link_tx.clone();
        debug!(generation, attempt = self.attempt, "Opening connection");

        let task = tokio::spawn(async move {
            let event = match transport.open(&token).await {
                Ok((sink, source)) => LinkEvent::Opened {
                    generation,
                    sink,
                    source,
                },
                Err(error) => LinkEvent::OpenFailed { generation, error },
            };
            let _ = link_tx.send(event).await;
        });
        self.link = Link::Opening(task);
    }

    fn reconnect(&mut self) {
        match self.intent.clone() {
            Some(Intent {
                token: Some(token),
                online: true,
                foreground: true,
            }) => self.open(token),
            _ => debug!("Retry fired but the session no longer wants a connection"),
        }
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened {
                generation,
                mut sink,
                source,
            } => {
                if generation != self.generation {
                    debug!(generation, "Discarding superseded connection");
                    let _ = timeout(self.config.send_timeout, sink.close()).await;
                    return;
                }

                let reader = tokio::spawn(read_frames(generation, source, self.link_tx.clone()));
                self.link = Link::Open { sink, reader };
                self.attempt = 0;
                self.last_seen = Instant::now();
                self.ping_at = self.config.keepalive_interval.map(|i| Instant::now() + i);
                self.set_state(ConnectionState::Connected);
            }
            LinkEvent::OpenFailed { generation, error } => {
                if generation == self.generation {
                    self.on_failure(error.into()).await;
                }
            }
            LinkEvent::Heartbeat { generation } => {
                if generation == self.generation {
                    self.last_seen = Instant::now();
                }
            }
            LinkEvent::Frame { generation, text } => {
                if generation != self.generation {
                    return;
                }
                self.last_seen = Instant::now();
                match InboundEvent::decode(&text) {
                    Ok(event) => self.dispatch(event).await,
                    Err(error) => {
                        warn!(error = %error, raw = %text, "Undecodable frame");
                        self.on_failure(ConnectionFailure::Protocol { error, raw: text })
                            .await;
                    }
                }
            }
            LinkEvent::Ended { generation, error } => {
                if generation != self.generation {
                    return;
                }
                let error = error
                    .unwrap_or_else(|| TransportError::Closed("closed by server".to_string()));
                self.on_failure(error.into()).await;
            }
        }
    }

    async fn dispatch(&mut self, event: InboundEvent) {
        let closed = match &self.feed {
            Some(feed) => feed.send(event.clone()).await.is_err(),
            None => false,
        };
        if closed {
            warn!("Event feed closed, inbound events are no longer stored");
            self.feed = None;
        }
        self.events.publish(event);
    }

    async fn on_failure(&mut self, failure: ConnectionFailure) {
        let class = classify(&failure);
        self.teardown().await;

        if class == ErrorClass::Unauthorized {
            warn!(error = %failure, "Credentials rejected by server");
            let _ = self.invalidations.send(SessionInvalidated {
                reason: failure.to_string(),
            });
        }

        match self.policy.decide(class, self.attempt) {
            RetryDecision::Retry(delay) => {
                debug!(
                    error = %failure,
                    class = ?class,
                    attempt = self.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.attempt = self.attempt.saturating_add(1);
                self.retry_at = Some(Instant::now() + delay);
                self.set_state(ConnectionState::Connecting);
            }
            RetryDecision::GiveUp => {
                warn!(error = %failure, class = ?class, "Giving up on connection");
                self.set_state(class.terminal_state());
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        if !self.state().is_connected() {
            return Err(ClientError::NotConnected);
        }
        let Link::Open { sink, .. } = &mut self.link else {
            return Err(ClientError::NotConnected);
        };

        let error = match timeout(self.config.send_timeout, sink.send_text(text)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => TransportError::Timeout,
        };
        self.on_failure(error.clone().into()).await;
        Err(ClientError::Transport(error))
    }

    async fn keepalive(&mut self) {
        self.ping_at = None;
        if let Some(sent) = self.ping_sent.take() {
            if self.last_seen < sent {
                warn!("Nothing heard from the server since the last ping");
                self.on_failure(TransportError::Timeout.into()).await;
                return;
            }
        }

        let Link::Open { sink, .. } = &mut self.link else {
            return;
        };

        let result = match timeout(self.config.send_timeout, sink.ping()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };
        match result {
            Ok(()) => {
                self.ping_sent = Some(Instant::now());
                self.ping_at = self.config.keepalive_interval.map(|i| Instant::now() + i);
            }
            Err(e) => self.on_failure(e.into()).await,
        }
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn read_frames(
    generation: u64,
    mut source: Box<dyn FrameSource>,
    link_tx: mpsc::Sender<LinkEvent>,
) {
    loop {
        let event = match source.next_frame().await {
            Some(Ok(Incoming::Text(text))) => LinkEvent::Frame { generation, text },
            Some(Ok(Incoming::Heartbeat)) => LinkEvent::Heartbeat { generation },
            Some(Err(error)) => LinkEvent::Ended {
                generation,
                error: Some(error),
            },
            None => LinkEvent::Ended {
                generation,
                error: None,
            },
        };
        let done = matches!(event, LinkEvent::Ended { .. });
        if link_tx.send(event).await.is_err() || done {
            return;
        }
    }
}
