//! `facelink-relay` – the question/answer channel.
//!
//! Server side, [`RelayServer`] accepts WebSocket sessions and hands each
//! query to a [`QueryDispatcher`], which calls the answering service through a
//! [`QueryBackend`] and streams `Processing` followed by an answer or an error
//! back over the same session.
//!
//! Client side, [`RelaySession`] keeps one connection alive through a bounded
//! reconnection state machine and exposes it as a command handle plus an event
//! stream.  [`WsConnector`] dials the relay over WebSocket; tests substitute
//! their own [`Connector`].
//!
//! # Wire protocol
//!
//! Frames are `{"event": ..., "data": ...}` envelopes, see
//! [`facelink_types::ClientFrame`] and [`facelink_types::ServerFrame`].

pub mod client;
pub mod dispatcher;
pub mod query_client;
pub mod server;
pub mod ws;

pub use client::{Connector, RelaySession, SessionConfig, SessionEvent, Transport};
pub use dispatcher::{Admission, Job, QueryDispatcher, SessionWorker};
pub use query_client::{DEFAULT_QUERY_TIMEOUT, QueryAnswer, QueryBackend, QueryClient};
pub use server::{BoundRelayServer, DEFAULT_PORT, GREETING, QUEUE_FULL_REPLY, RelayServer};
pub use ws::WsConnector;
