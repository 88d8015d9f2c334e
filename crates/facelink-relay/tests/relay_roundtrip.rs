//! Relay server and client session talking over a loopback WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use facelink_relay::{
    QueryAnswer, QueryBackend, QueryDispatcher, RelayServer, RelaySession, SessionConfig,
    SessionEvent, WsConnector, GREETING, QUEUE_FULL_REPLY,
};
use facelink_types::{ClientFrame, FaceError, RelayMessage, ServerFrame, SessionState, Source};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::tungstenite::Message;

struct EchoBackend;

#[async_trait]
impl QueryBackend for EchoBackend {
    async fn ask(&self, message: &str) -> Result<QueryAnswer, FaceError> {
        if message == "fail" {
            return Err(FaceError::QueryService {
                status: Some(500),
                message: "index unavailable".into(),
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(QueryAnswer {
            answer: format!("you asked: {message}"),
            sources: vec![Source {
                content: "faces.db".into(),
            }],
        })
    }
}

/// Takes one second per query and counts started and finished calls.
#[derive(Default)]
struct SlowBackend {
    calls: AtomicUsize,
    finished: AtomicUsize,
}

#[async_trait]
impl QueryBackend for SlowBackend {
    async fn ask(&self, message: &str) -> Result<QueryAnswer, FaceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(QueryAnswer {
            answer: format!("late answer to {message}"),
            sources: Vec::new(),
        })
    }
}

async fn start_relay() -> SocketAddr {
    start_relay_with(Arc::new(EchoBackend)).await
}

async fn start_relay_with(backend: Arc<dyn QueryBackend>) -> SocketAddr {
    let dispatcher = Arc::new(QueryDispatcher::new(backend));
    let bound = RelayServer::new(dispatcher)
        .with_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
        .bind()
        .await
        .unwrap();
    let addr = bound.local_addr();
    tokio::spawn(bound.serve());
    addr
}

async fn next_message(events: &mut UnboundedReceiver<SessionEvent>) -> RelayMessage {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for relay message")
            .expect("event stream closed");
        if let SessionEvent::Message(msg) = event {
            return msg;
        }
    }
}

async fn connected_session(addr: SocketAddr) -> (RelaySession, UnboundedReceiver<SessionEvent>) {
    let connector = Arc::new(WsConnector::new(format!("ws://{addr}")));
    let (session, mut events) = RelaySession::connect(connector, SessionConfig::default());

    assert_eq!(
        next_message(&mut events).await,
        RelayMessage::System("connected".into())
    );
    assert_eq!(
        next_message(&mut events).await,
        RelayMessage::System(GREETING.into())
    );
    assert_eq!(session.state(), SessionState::Connected);
    (session, events)
}

#[tokio::test]
async fn query_round_trip_over_websocket() {
    let addr = start_relay().await;
    let (session, mut events) = connected_session(addr).await;

    session.send_query("who registered today?").unwrap();

    assert_eq!(next_message(&mut events).await, RelayMessage::Processing);
    assert_eq!(
        next_message(&mut events).await,
        RelayMessage::Answer {
            text: "you asked: who registered today?".into(),
            sources: vec![Source {
                content: "faces.db".into()
            }],
        }
    );
    session.close().await;
}

#[tokio::test]
async fn queued_queries_are_answered_in_order() {
    let addr = start_relay().await;
    let (session, mut events) = connected_session(addr).await;

    session.send_query("first").unwrap();
    session.send_query("fail").unwrap();
    session.send_query("   ").unwrap();

    let mut got = Vec::new();
    for _ in 0..5 {
        got.push(next_message(&mut events).await);
    }
    assert_eq!(got[0], RelayMessage::Processing);
    assert!(matches!(&got[1], RelayMessage::Answer { text, .. } if text == "you asked: first"));
    assert_eq!(got[2], RelayMessage::Processing);
    assert!(matches!(&got[3], RelayMessage::Error(text) if text.contains("index unavailable")));
    assert_eq!(
        got[4],
        RelayMessage::Error("Please provide a valid query.".into())
    );
    session.close().await;
}

#[tokio::test]
async fn unreachable_relay_ends_in_failed() {
    // Bind and drop to get a port nothing listens on.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = SessionConfig {
        max_attempts: 2,
        retry_delay: Duration::from_millis(50),
        handshake_timeout: Duration::from_secs(2),
    };
    let connector = Arc::new(WsConnector::new(format!("ws://{addr}")));
    let (session, _events) = RelaySession::connect(connector, config);

    let mut state = session.state_watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *state.borrow_and_update() != SessionState::Failed {
            state.changed().await.unwrap();
        }
    })
    .await
    .expect("session never reached Failed");

    assert_eq!(session.send_query("anyone?"), Err(FaceError::NotConnected));
    session.close().await;
}

#[tokio::test]
async fn closing_a_flooded_session_cancels_its_queries() {
    let backend = Arc::new(SlowBackend::default());
    let addr = start_relay_with(backend.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    for i in 0..12 {
        let frame = ClientFrame::SendMessage {
            message: format!("question {i}"),
        };
        let json = serde_json::to_string(&frame).unwrap();
        ws.send(Message::Text(json.into())).await.unwrap();
    }

    // The queue overflowed and the socket loop is still answering.
    let (mut processing, mut refused) = (false, false);
    while !(processing && refused) {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for relay frame")
            .expect("relay closed the socket")
            .unwrap();
        let Message::Text(text) = msg else { continue };
        let ServerFrame::Message(wire) = serde_json::from_str(text.as_str()).unwrap();
        match RelayMessage::from_wire(wire) {
            RelayMessage::Processing => processing = true,
            RelayMessage::Error(text) if text == QUEUE_FULL_REPLY => refused = true,
            _ => {}
        }
    }

    ws.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(backend.calls.load(Ordering::SeqCst) <= 1);
    assert_eq!(
        backend.finished.load(Ordering::SeqCst),
        0,
        "in-flight query completed after the session closed"
    );
}
