//! [`GatewayServer`] – binds the router and serves it with `axum::serve`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use facelink_types::FaceError;
use tokio::net::TcpListener;
use tracing::info;

use crate::proxy::Forwarder;
use crate::routes::{GatewayState, router};

/// Default TCP port for the gateway.
pub const DEFAULT_PORT: u16 = 5000;

/// Upper bound for a forwarded recognition request.
pub const RECOGNIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the gateway listens and where it forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub addr: SocketAddr,
    pub recognition_url: String,
    pub register_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            recognition_url: "http://localhost:8000/recognize-face".to_string(),
            register_url: "http://localhost:8000/register-face".to_string(),
        }
    }
}

pub struct GatewayServer {
    config: GatewayConfig,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    pub fn port(&self) -> u16 {
        self.config.addr.port()
    }

    /// Bind the listener without serving yet.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::Transport`] if the address cannot be bound.
    pub async fn bind(self) -> Result<BoundGateway, FaceError> {
        let addr = self.config.addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| FaceError::Transport(format!("bind error on {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| FaceError::Transport(format!("local address unavailable: {e}")))?;

        let client = reqwest::Client::new();
        let state = GatewayState {
            recognize: Arc::new(
                Forwarder::new(client.clone(), self.config.recognition_url)
                    .with_timeout(RECOGNIZE_TIMEOUT),
            ),
            register: Arc::new(Forwarder::new(client, self.config.register_url)),
        };
        Ok(BoundGateway {
            listener,
            local_addr,
            state,
        })
    }

    /// Bind and serve until the task is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::Transport`] if binding or serving fails.
    pub async fn run(self) -> Result<(), FaceError> {
        self.bind().await?.serve().await
    }
}

/// A gateway whose listener is already bound.
pub struct BoundGateway {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: GatewayState,
}

impl BoundGateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// # Errors
    ///
    /// Returns [`FaceError::Transport`] if the server loop fails.
    pub async fn serve(self) -> Result<(), FaceError> {
        info!(
            addr = %self.local_addr,
            recognize = %self.state.recognize.url(),
            register = %self.state.register.url(),
            "gateway listening"
        );
        axum::serve(self.listener, router(self.state))
            .await
            .map_err(|e| FaceError::Transport(format!("gateway server error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Multipart, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use reqwest::multipart::{Form, Part};
    use serde_json::{Value, json};
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(String, Option<String>, Vec<u8>)>>>;

    /// Upstream that records every field and answers with `status`/`body`.
    async fn spawn_upstream(status: StatusCode, body: Value) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let handler = move |State(seen): State<Seen>, mut multipart: Multipart| {
            let body = body.clone();
            async move {
                while let Some(field) = multipart.next_field().await.unwrap() {
                    let name = field.name().unwrap_or_default().to_string();
                    let file_name = field.file_name().map(str::to_string);
                    let data = field.bytes().await.unwrap().to_vec();
                    seen.lock().unwrap().push((name, file_name, data));
                }
                (status, Json(body))
            }
        };
        let router = Router::new()
            .route("/face", post(handler))
            .with_state(Arc::clone(&seen));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}/face"), seen)
    }

    async fn spawn_gateway(recognition_url: String, register_url: String) -> String {
        let bound = GatewayServer::new(GatewayConfig {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            recognition_url,
            register_url,
        })
        .bind()
        .await
        .unwrap();
        let addr = bound.local_addr();
        tokio::spawn(bound.serve());
        format!("http://{addr}")
    }

    fn image_part() -> Part {
        Part::bytes(vec![0xFF, 0xD8, 0xFF])
            .file_name("snap.jpg")
            .mime_str("image/jpeg")
            .unwrap()
    }

    fn texts(seen: &Seen, name: &str) -> Vec<String> {
        seen.lock()
            .unwrap()
            .iter()
            .filter(|(n, file, _)| n == name && file.is_none())
            .map(|(_, _, v)| String::from_utf8(v.clone()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn recognize_without_image_is_rejected() {
        let (upstream, seen) = spawn_upstream(StatusCode::OK, json!({})).await;
        let gateway = spawn_gateway(upstream.clone(), upstream).await;

        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/recognize"))
            .multipart(Form::new().text("max_faces", "2"))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(
            body,
            json!({"error": true, "message": "No image provided for recognition"})
        );
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn recognize_injects_defaults_and_passes_reply_through() {
        let reply = json!({"faces": [], "total_faces_detected": 0});
        let (upstream, seen) = spawn_upstream(StatusCode::OK, reply.clone()).await;
        let gateway = spawn_gateway(upstream.clone(), upstream).await;

        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/recognize"))
            .multipart(
                Form::new()
                    .part("image", image_part())
                    .text("max_results", "4"),
            )
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.json::<Value>().await.unwrap(), reply);

        assert_eq!(texts(&seen, "max_results"), vec!["4"]);
        assert_eq!(texts(&seen, "max_faces"), vec!["5"]);
        assert_eq!(texts(&seen, "similarity_threshold"), vec!["0.65"]);
        let seen = seen.lock().unwrap();
        let image = seen.iter().find(|(n, _, _)| n == "image").unwrap();
        assert_eq!(image.1.as_deref(), Some("snap.jpg"));
        assert_eq!(image.2, vec![0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn caller_supplied_parameters_are_not_overridden() {
        let (upstream, seen) = spawn_upstream(StatusCode::OK, json!({"faces": []})).await;
        let gateway = spawn_gateway(upstream.clone(), upstream).await;

        reqwest::Client::new()
            .post(format!("{gateway}/api/recognize"))
            .multipart(
                Form::new()
                    .part("image", image_part())
                    .text("max_faces", "1")
                    .text("similarity_threshold", "0.9"),
            )
            .send()
            .await
            .unwrap();

        assert_eq!(texts(&seen, "max_faces"), vec!["1"]);
        assert_eq!(texts(&seen, "similarity_threshold"), vec!["0.9"]);
    }

    #[tokio::test]
    async fn upstream_failure_status_and_body_pass_through() {
        let detail = json!({"detail": "No face detected in the image"});
        let (upstream, _seen) = spawn_upstream(StatusCode::BAD_REQUEST, detail.clone()).await;
        let gateway = spawn_gateway(upstream.clone(), upstream).await;

        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/recognize"))
            .multipart(Form::new().part("image", image_part()))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(resp.json::<Value>().await.unwrap(), detail);
    }

    #[tokio::test]
    async fn unreachable_upstream_yields_500() {
        let dead = "http://127.0.0.1:1/face".to_string();
        let gateway = spawn_gateway(dead.clone(), dead).await;

        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/register"))
            .multipart(Form::new().text("name", "Ada"))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], true);
        assert_eq!(body["message"], "Error connecting to face recognition service");
    }

    #[tokio::test]
    async fn register_forwards_fields_without_defaults() {
        let (recognize, _) = spawn_upstream(StatusCode::OK, json!({})).await;
        let (register, seen) =
            spawn_upstream(StatusCode::CREATED, json!({"message": "registered"})).await;
        let gateway = spawn_gateway(recognize, register).await;

        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/register"))
            .multipart(
                Form::new()
                    .text("name", "Ada Lovelace")
                    .part("image", image_part()),
            )
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        assert_eq!(texts(&seen, "name"), vec!["Ada Lovelace"]);
        assert!(texts(&seen, "max_faces").is_empty());
        assert!(texts(&seen, "similarity_threshold").is_empty());
    }

    #[tokio::test]
    async fn api_root_reports_service_info() {
        let dead = "http://127.0.0.1:1/face".to_string();
        let gateway = spawn_gateway(dead.clone(), dead).await;

        let body: Value = reqwest::get(format!("{gateway}/api"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["message"], "FaceLink gateway is running");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
