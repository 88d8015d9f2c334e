//! [`RelaySession`] – client side of one long-lived relay connection.
//!
//! A driver task owns the transport and runs the connection state machine:
//!
//! ```text
//!            handshake ok                       transport drop
//! Connecting ───────────▶ Connected ───────────────────────────▶ Disconnected
//!     │ ▲                                                           │
//!     │ └──────────────── delay, attempts left ─────────────────────┘
//!     │ handshake error / timeout
//!     ▼
//! Disconnected ── attempts exhausted ──▶ Failed ── reconnect() ──▶ Connecting
//! ```
//!
//! The consumer talks to the driver through a command channel and observes it
//! through a `watch` of [`SessionState`] plus an event stream of
//! [`SessionEvent`]s.  Queries are only accepted while `Connected`; in every
//! other state [`RelaySession::send_query`] fails locally with
//! [`FaceError::NotConnected`] and nothing touches the network.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use facelink_types::{ClientFrame, FaceError, RelayMessage, ServerFrame, SessionState};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Seams
// ─────────────────────────────────────────────────────────────────────────────

/// An established, framed connection to the relay.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), FaceError>;

    /// Next inbound frame; `None` once the connection is gone.
    async fn recv(&mut self) -> Option<Result<ServerFrame, FaceError>>;

    async fn close(&mut self);
}

/// Opens [`Transport`]s.  Called once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, FaceError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration & events
// ─────────────────────────────────────────────────────────────────────────────

/// Reconnection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Handshakes attempted per connection sequence before giving up.
    pub max_attempts: u32,
    /// Pause between a failed handshake and the next attempt.
    pub retry_delay: Duration,
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(1000),
            handshake_timeout: Duration::from_millis(10_000),
        }
    }
}

/// Everything the consumer is told about the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    State(SessionState),
    Message(RelayMessage),
    /// A query that was sent (or queued) but will never be answered.
    QueryFailed { query: String, reason: FaceError },
}

/// Text of the local message emitted on every successful handshake.
pub const CONNECTED_NOTICE: &str = "connected";

enum Command {
    Send(String),
    Reconnect,
    Close,
}

// ─────────────────────────────────────────────────────────────────────────────
// RelaySession
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a relay session.  Cheap to share behind an `Arc`.
pub struct RelaySession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    closed: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl RelaySession {
    /// Spawn the driver and start connecting immediately.
    ///
    /// Returns the handle and the receiving end of the event stream.
    pub fn connect(
        connector: Arc<dyn Connector>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Connecting);

        let driver = Driver {
            connector,
            config,
            commands: command_rx,
            state: state_tx,
            events,
        };
        let handle = tokio::spawn(driver.run());

        (
            Self {
                commands,
                state,
                closed: AtomicBool::new(false),
                driver: Mutex::new(Some(handle)),
            },
            event_rx,
        )
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Send a query over the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::NotConnected`] unless the session is `Connected`.
    pub fn send_query(&self, text: &str) -> Result<(), FaceError> {
        if self.closed.load(Ordering::Acquire) || self.state() != SessionState::Connected {
            return Err(FaceError::NotConnected);
        }
        self.commands
            .send(Command::Send(text.to_string()))
            .map_err(|_| FaceError::NotConnected)
    }

    /// Start a fresh connection sequence.
    ///
    /// Leaves `Failed` or `Disconnected`; while connected it drops the current
    /// transport first.  Ignored while a sequence is already running.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::NotConnected`] once the session has been closed.
    pub fn reconnect(&self) -> Result<(), FaceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FaceError::NotConnected);
        }
        self.commands
            .send(Command::Reconnect)
            .map_err(|_| FaceError::NotConnected)
    }

    /// Release the transport and stop the driver.
    ///
    /// Safe to call from several tasks at once; only the first call acts.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.commands.send(Command::Close);
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

struct Driver {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

enum ConnectOutcome {
    Connected(Box<dyn Transport>),
    Exhausted,
    Closed,
}

enum ConnectedExit {
    Dropped,
    Reconnect,
    Closed,
}

impl Driver {
    async fn run(mut self) {
        loop {
            match self.connect_sequence().await {
                ConnectOutcome::Connected(transport) => {
                    match self.connected(transport).await {
                        ConnectedExit::Closed => break,
                        ConnectedExit::Dropped => self.set_state(SessionState::Disconnected),
                        ConnectedExit::Reconnect => {}
                    }
                }
                ConnectOutcome::Exhausted => {
                    self.set_state(SessionState::Failed);
                    warn!(
                        attempts = self.config.max_attempts,
                        "relay reconnection attempts exhausted"
                    );
                    if !self.await_reconnect().await {
                        break;
                    }
                }
                ConnectOutcome::Closed => break,
            }
        }
        self.set_state(SessionState::Disconnected);
        debug!("relay session driver stopped");
    }

    /// Up to `max_attempts` handshakes separated by `retry_delay`.
    async fn connect_sequence(&mut self) -> ConnectOutcome {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            self.set_state(SessionState::Connecting);

            let connector = Arc::clone(&self.connector);
            let handshake = tokio::time::timeout(self.config.handshake_timeout, async move {
                connector.connect().await
            });
            let Some(result) = self.until_closed(handshake).await else {
                return ConnectOutcome::Closed;
            };

            match result {
                Ok(Ok(transport)) => {
                    info!(attempt, "relay connected");
                    return ConnectOutcome::Connected(transport);
                }
                Ok(Err(e)) => warn!(attempt, error = %e, "relay handshake failed"),
                Err(_) => warn!(attempt, "relay handshake timed out"),
            }
            self.set_state(SessionState::Disconnected);

            if attempt < attempts
                && self
                    .until_closed(tokio::time::sleep(self.config.retry_delay))
                    .await
                    .is_none()
            {
                return ConnectOutcome::Closed;
            }
        }
        ConnectOutcome::Exhausted
    }

    /// Park in `Failed` until the consumer asks to reconnect (`true`) or
    /// closes (`false`).
    async fn await_reconnect(&mut self) -> bool {
        loop {
            match self.commands.recv().await {
                Some(Command::Reconnect) => return true,
                Some(Command::Send(query)) => self.fail_query(query, FaceError::NotConnected),
                Some(Command::Close) | None => return false,
            }
        }
    }

    async fn connected(&mut self, mut transport: Box<dyn Transport>) -> ConnectedExit {
        self.set_state(SessionState::Connected);
        self.emit(SessionEvent::Message(RelayMessage::System(
            CONNECTED_NOTICE.to_string(),
        )));

        // Queries sent and not yet answered, oldest first.
        let mut pending: VecDeque<String> = VecDeque::new();

        loop {
            tokio::select! {
                frame = transport.recv() => match frame {
                    Some(Ok(ServerFrame::Message(wire))) => {
                        let msg = RelayMessage::from_wire(wire);
                        if matches!(msg, RelayMessage::Answer { .. } | RelayMessage::Error(_)) {
                            pending.pop_front();
                        }
                        self.emit(SessionEvent::Message(msg));
                    }
                    Some(Err(e)) => warn!(error = %e, "dropping malformed relay frame"),
                    None => {
                        warn!(pending = pending.len(), "relay connection lost");
                        self.fail_pending(&mut pending, "connection lost");
                        return ConnectedExit::Dropped;
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(query)) => {
                        let frame = ClientFrame::SendMessage { message: query.clone() };
                        if let Err(e) = transport.send(frame).await {
                            warn!(error = %e, "relay send failed");
                            self.fail_query(query, e);
                            self.fail_pending(&mut pending, "connection lost");
                            transport.close().await;
                            return ConnectedExit::Dropped;
                        }
                        pending.push_back(query);
                    }
                    Some(Command::Reconnect) => {
                        self.fail_pending(&mut pending, "reconnecting");
                        transport.close().await;
                        return ConnectedExit::Reconnect;
                    }
                    Some(Command::Close) | None => {
                        self.fail_pending(&mut pending, "session closed");
                        transport.close().await;
                        return ConnectedExit::Closed;
                    }
                },
            }
        }
    }

    /// Drive `fut` while serving commands.  `None` if the session was closed
    /// first.
    async fn until_closed<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return Some(out),
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(query)) => self.fail_query(query, FaceError::NotConnected),
                    Some(Command::Reconnect) => {}
                    Some(Command::Close) | None => return None,
                },
            }
        }
    }

    fn fail_pending(&self, pending: &mut VecDeque<String>, reason: &str) {
        for query in pending.drain(..) {
            self.fail_query(query, FaceError::Transport(reason.to_string()));
        }
    }

    fn fail_query(&self, query: String, reason: FaceError) {
        self.emit(SessionEvent::QueryFailed { query, reason });
    }

    fn set_state(&self, next: SessionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(state = %next, "relay session state");
            self.emit(SessionEvent::State(next));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Consumer may have dropped its receiver; the session keeps running.
        let _ = self.events.send(event);
    }
}
