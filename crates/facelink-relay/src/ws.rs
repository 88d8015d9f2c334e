//! WebSocket implementation of the relay [`Connector`]/[`Transport`] seams.

use async_trait::async_trait;
use facelink_types::{ClientFrame, FaceError, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::client::{Connector, Transport};

/// Dials `ws://` URLs such as `ws://localhost:5001`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, FaceError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| FaceError::Transport(format!("connect {}: {e}", self.url)))?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), FaceError> {
        let json = serde_json::to_string(&frame)
            .map_err(|e| FaceError::Protocol(format!("serialization error: {e}")))?;
        self.stream
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| FaceError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ServerFrame, FaceError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(
                        serde_json::from_str::<ServerFrame>(text.as_str())
                            .map_err(|e| FaceError::Protocol(e.to_string())),
                    );
                }
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(e)) => {
                    debug!(error = %e, "relay read failed");
                    return None;
                }
                // Ping/pong and binary frames carry nothing for us.
                Some(Ok(_)) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "relay close handshake failed");
        }
    }
}
