//! [`RelayServer`] – WebSocket endpoint in front of the answering service.
//!
//! Listens on `0.0.0.0:5001` (configurable via [`RelayServer::with_port`]).
//! Every accepted connection becomes one session task holding:
//!
//! * the socket halves,
//! * an outbound `mpsc` queue of [`RelayMessage`]s,
//! * a [`SessionWorker`] that answers queries one at a time.
//!
//! The session greets the client, then loops over outbound messages and
//! inbound frames until either side goes away.  Leaving the loop aborts the
//! worker, which cancels any query still being answered.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use facelink_types::{ClientFrame, FaceError, RelayMessage, ServerFrame};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatcher::{Admission, Job, JOB_QUEUE_CAPACITY, QueryDispatcher, SessionWorker};

/// Default TCP port for the relay.
pub const DEFAULT_PORT: u16 = 5001;

/// First message every session receives.
pub const GREETING: &str = "Connected to the FaceLink answering service. How can I help you?";

/// Reply to a query that is empty after trimming.
pub const EMPTY_QUERY_REPLY: &str = "Please provide a valid query.";

/// Reply to a frame that is not a well-formed `sendMessage` event.
pub const INVALID_FRAME_REPLY: &str = "Invalid JSON format in message.";

/// Reply to a query that arrives while the session's job queue is full.
pub const QUEUE_FULL_REPLY: &str = "Too many pending queries. Please wait for an answer.";

const OUTBOUND_CAPACITY: usize = 4 * (JOB_QUEUE_CAPACITY + 2);

// ---------------------------------------------------------------------------
// RelayServer
// ---------------------------------------------------------------------------

/// Accept loop for relay sessions.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use facelink_relay::{QueryClient, QueryDispatcher, RelayServer};
///
/// #[tokio::main]
/// async fn main() {
///     let backend = QueryClient::new("http://localhost:8000/query").unwrap();
///     let dispatcher = Arc::new(QueryDispatcher::new(Arc::new(backend)));
///     RelayServer::new(dispatcher).run().await.unwrap();
/// }
/// ```
pub struct RelayServer {
    dispatcher: Arc<QueryDispatcher>,
    addr: SocketAddr,
}

impl RelayServer {
    /// Create a server on `0.0.0.0:`[`DEFAULT_PORT`].
    pub fn new(dispatcher: Arc<QueryDispatcher>) -> Self {
        Self {
            dispatcher,
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Override the whole listening address (builder-style).
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Bind the listener without accepting yet.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::Transport`] if the address cannot be bound.
    pub async fn bind(self) -> Result<BoundRelayServer, FaceError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| FaceError::Transport(format!("bind error on {}: {e}", self.addr)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| FaceError::Transport(format!("local address unavailable: {e}")))?;
        Ok(BoundRelayServer {
            listener,
            local_addr,
            dispatcher: self.dispatcher,
            sessions: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Bind and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::Transport`] if the address cannot be bound.
    pub async fn run(self) -> Result<(), FaceError> {
        self.bind().await?.serve().await;
        Ok(())
    }
}

/// A relay whose listener is already bound.
pub struct BoundRelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Arc<QueryDispatcher>,
    sessions: Arc<AtomicUsize>,
}

impl BoundRelayServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared counter of open sessions.
    pub fn session_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.sessions)
    }

    /// Accept connections until the task is dropped.
    pub async fn serve(self) {
        info!(addr = %self.local_addr, "relay listening");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let sessions = Arc::clone(&self.sessions);
                    tokio::spawn(async move {
                        if let Err(e) = handle_session(stream, peer, dispatcher, sessions).await {
                            warn!(%peer, error = %e, "relay session ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-session handler
// ---------------------------------------------------------------------------

/// Decrements the open-session counter when the session ends.
struct SessionSlot(Arc<AtomicUsize>);

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn handle_session(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<QueryDispatcher>,
    sessions: Arc<AtomicUsize>,
) -> Result<(), FaceError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| FaceError::Transport(format!("WS handshake from {peer}: {e}")))?;

    let session_id = Uuid::new_v4();
    let open = sessions.fetch_add(1, Ordering::AcqRel) + 1;
    let _slot = SessionSlot(sessions);
    info!(%session_id, %peer, open_sessions = open, "relay session opened");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<RelayMessage>(OUTBOUND_CAPACITY);
    let worker = SessionWorker::spawn(dispatcher, out_tx, session_id);

    send_frame(&mut ws_tx, &RelayMessage::System(GREETING.to_string())).await?;

    loop {
        tokio::select! {
            // ── Downstream: worker → client ─────────────────────────────────
            Some(msg) = out_rx.recv() => {
                if let Err(e) = send_frame(&mut ws_tx, &msg).await {
                    debug!(%session_id, error = %e, "client write failed");
                    break;
                }
            }
            // ── Upstream: client → worker ───────────────────────────────────
            frame = ws_rx.next() => {
                match frame {
                    // Never await the job queue here: the loop must keep
                    // reading so a Close frame can cancel the worker.
                    Some(Ok(Message::Text(text))) => {
                        match worker.try_submit(parse_inbound(text.as_str())) {
                            Ok(Admission::Queued) => {}
                            Ok(Admission::Full) => {
                                warn!(%session_id, "job queue full, query refused");
                                let reply = RelayMessage::Error(QUEUE_FULL_REPLY.to_string());
                                if send_frame(&mut ws_tx, &reply).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%session_id, error = %e, "client read failed");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    worker.shutdown();
    info!(%session_id, %peer, "relay session closed");
    Ok(())
}

async fn send_frame<S>(ws_tx: &mut S, msg: &RelayMessage) -> Result<(), FaceError>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(&ServerFrame::from(msg))
        .map_err(|e| FaceError::Protocol(format!("serialization error: {e}")))?;
    ws_tx
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| FaceError::Transport(e.to_string()))
}

// ---------------------------------------------------------------------------
// Inbound frame parser
// ---------------------------------------------------------------------------

/// Classify one inbound text frame.
///
/// | Frame | Job |
/// |---|---|
/// | `sendMessage` with non-blank text | [`Job::Query`] (trimmed) |
/// | `sendMessage` with blank or missing text | [`Job::Reject`] with [`EMPTY_QUERY_REPLY`] |
/// | anything else | [`Job::Reject`] with [`INVALID_FRAME_REPLY`] |
pub(crate) fn parse_inbound(text: &str) -> Job {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::SendMessage { message }) => {
            let query = message.trim();
            if query.is_empty() {
                Job::Reject(EMPTY_QUERY_REPLY.to_string())
            } else {
                Job::Query(query.to_string())
            }
        }
        Err(_) => Job::Reject(INVALID_FRAME_REPLY.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_client::{QueryAnswer, QueryBackend};
    use async_trait::async_trait;

    struct NeverCalled;

    #[async_trait]
    impl QueryBackend for NeverCalled {
        async fn ask(&self, _message: &str) -> Result<QueryAnswer, FaceError> {
            Err(FaceError::QueryService {
                status: None,
                message: "unused".into(),
            })
        }
    }

    fn dispatcher() -> Arc<QueryDispatcher> {
        Arc::new(QueryDispatcher::new(Arc::new(NeverCalled)))
    }

    // ── Builder ──────────────────────────────────────────────────────────────

    #[test]
    fn default_port_is_5001() {
        assert_eq!(RelayServer::new(dispatcher()).port(), DEFAULT_PORT);
    }

    #[test]
    fn with_port_overrides_default() {
        assert_eq!(RelayServer::new(dispatcher()).with_port(9999).port(), 9999);
    }

    #[tokio::test]
    async fn bind_reports_ephemeral_port() {
        let bound = RelayServer::new(dispatcher())
            .with_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
            .bind()
            .await
            .unwrap();
        assert_ne!(bound.local_addr().port(), 0);
        assert_eq!(bound.session_count().load(Ordering::Acquire), 0);
    }

    // ── Inbound parsing ──────────────────────────────────────────────────────

    #[test]
    fn send_message_becomes_trimmed_query() {
        let job = parse_inbound(r#"{"event":"sendMessage","data":{"message":"  who is Ada?  "}}"#);
        assert_eq!(job, Job::Query("who is Ada?".into()));
    }

    #[test]
    fn blank_message_is_rejected() {
        let job = parse_inbound(r#"{"event":"sendMessage","data":{"message":"   "}}"#);
        assert_eq!(job, Job::Reject(EMPTY_QUERY_REPLY.into()));
    }

    #[test]
    fn missing_message_is_rejected_as_empty() {
        let job = parse_inbound(r#"{"event":"sendMessage","data":{}}"#);
        assert_eq!(job, Job::Reject(EMPTY_QUERY_REPLY.into()));
    }

    #[test]
    fn malformed_frame_is_rejected() {
        assert_eq!(
            parse_inbound("not json at all"),
            Job::Reject(INVALID_FRAME_REPLY.into())
        );
        assert_eq!(
            parse_inbound(r#"{"event":"subscribe","data":{}}"#),
            Job::Reject(INVALID_FRAME_REPLY.into())
        );
    }
}
