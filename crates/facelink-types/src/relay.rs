//! Relay session vocabulary and the JSON frames of the relay wire protocol.
//!
//! Every frame is an `{"event": ..., "data": ...}` envelope:
//!
//! | Direction | Event | Data |
//! |---|---|---|
//! | client → server | `sendMessage` | `{"message": "..."}` |
//! | server → client | `message` | `{"type": "system"\|"answer"\|"error", "message": "...", "sources": [...]}` |

use serde::{Deserialize, Serialize};

/// Text of the `system` message that announces an upstream call in progress.
pub const PROCESSING_NOTICE: &str = "Processing your query...";

/// Connection state of a client-side relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
    /// Reconnection attempts exhausted; only an explicit reconnect leaves it.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// A citation returned alongside an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub content: String,
}

/// Application-level message delivered to a relay consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    System(String),
    /// The upstream call for the current query has started.
    Processing,
    Answer { text: String, sources: Vec<Source> },
    Error(String),
}

impl RelayMessage {
    /// Lower into the outbound wire representation.
    pub fn to_wire(&self) -> WireMessage {
        match self {
            RelayMessage::System(text) => WireMessage::new(WireKind::System, text.clone()),
            RelayMessage::Processing => WireMessage::new(WireKind::System, PROCESSING_NOTICE),
            RelayMessage::Answer { text, sources } => WireMessage {
                kind: WireKind::Answer,
                message: text.clone(),
                sources: sources.clone(),
            },
            RelayMessage::Error(text) => WireMessage::new(WireKind::Error, text.clone()),
        }
    }

    /// Lift a wire message back into a [`RelayMessage`].
    ///
    /// A `system` message mentioning "Processing" is the busy notice.
    pub fn from_wire(wire: WireMessage) -> Self {
        match wire.kind {
            WireKind::System if wire.message.contains("Processing") => RelayMessage::Processing,
            WireKind::System => RelayMessage::System(wire.message),
            WireKind::Answer => RelayMessage::Answer {
                text: wire.message,
                sources: wire.sources,
            },
            WireKind::Error => RelayMessage::Error(wire.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireKind {
    System,
    Answer,
    Error,
}

/// Payload of the outbound `message` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: WireKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
}

impl WireMessage {
    pub fn new(kind: WireKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sources: Vec::new(),
        }
    }
}

/// Frames sent by the UI layer to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    #[serde(rename = "sendMessage")]
    SendMessage {
        #[serde(default)]
        message: String,
    },
}

/// Frames sent by the relay to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerFrame {
    #[serde(rename = "message")]
    Message(WireMessage),
}

impl From<&RelayMessage> for ServerFrame {
    fn from(msg: &RelayMessage) -> Self {
        ServerFrame::Message(msg.to_wire())
    }
}
