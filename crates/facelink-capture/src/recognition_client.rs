//! [`RecognitionClient`] – multipart HTTP client for the recognition service.
//!
//! Posts one frame plus tuning parameters to the configured endpoint (e.g.
//! `http://localhost:8000/recognize-face`) and decodes the multi-face
//! response envelope.
//!
//! # Failure classification
//!
//! | Upstream outcome | Result |
//! |---|---|
//! | 2xx, `faces` absent | `Ok` with zero detections |
//! | non-2xx, `detail` mentions "No face detected" | [`FaceError::NoFaceDetected`] |
//! | any other non-2xx | [`FaceError::RecognitionService`] with status |
//! | transport failure / timeout | [`FaceError::RecognitionService`] without status |

use std::time::Duration;

use async_trait::async_trait;
use facelink_types::{FaceError, Frame, RecognitionParams, RecognitionResponse};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::debug;

/// Upper bound for one recognition round trip.
pub const DEFAULT_RECOGNITION_TIMEOUT: Duration = Duration::from_secs(30);

const NO_FACE_MARKER: &str = "No face detected";

/// Anything that can turn a frame into a multi-face recognition response.
///
/// Implementations must be safe to share between capture loops.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(
        &self,
        frame: &Frame,
        params: &RecognitionParams,
    ) -> Result<RecognitionResponse, FaceError>;
}

/// HTTP implementation of [`Recognizer`].
///
/// Construct once and share; the inner `reqwest::Client` pools connections.
#[derive(Clone)]
pub struct RecognitionClient {
    endpoint: String,
    client: reqwest::Client,
}

impl RecognitionClient {
    /// Create a client for `endpoint` with [`DEFAULT_RECOGNITION_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::Config`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, FaceError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_RECOGNITION_TIMEOUT)
            .build()
            .map_err(|e| FaceError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(endpoint, client))
    }

    /// Reuse an existing `reqwest::Client`.
    pub fn with_client(endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_form(frame: &Frame, params: &RecognitionParams) -> Result<Form, FaceError> {
        let image = Part::bytes(frame.data.clone())
            .file_name("face.jpg")
            .mime_str(&frame.mime)
            .map_err(|e| FaceError::Source(format!("invalid frame mime {}: {e}", frame.mime)))?;

        Ok(Form::new()
            .part("image", image)
            .text("similarity_threshold", params.similarity_threshold.to_string())
            .text("max_faces", params.max_faces.to_string())
            .text("max_results", params.max_results.to_string()))
    }
}

#[async_trait]
impl Recognizer for RecognitionClient {
    async fn recognize(
        &self,
        frame: &Frame,
        params: &RecognitionParams,
    ) -> Result<RecognitionResponse, FaceError> {
        let form = Self::build_form(frame, params)?;

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| FaceError::RecognitionService {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), &body));
        }

        let decoded: RecognitionResponse =
            response
                .json()
                .await
                .map_err(|e| FaceError::RecognitionService {
                    status: Some(status.as_u16()),
                    message: format!("malformed response: {e}"),
                })?;
        debug!(faces = decoded.faces.len(), "recognition response decoded");
        Ok(decoded)
    }
}

/// Map a non-2xx recognition response onto the error taxonomy.
pub(crate) fn classify_failure(status: u16, body: &str) -> FaceError {
    let message = failure_message(body);
    if message.contains(NO_FACE_MARKER) {
        FaceError::NoFaceDetected
    } else {
        FaceError::RecognitionService {
            status: Some(status),
            message,
        }
    }
}

/// Pull the human-readable reason out of an error body.
///
/// The service reports FastAPI-style `{"detail": ...}`; the forwarding proxy
/// reports `{"error": true, "message": ...}`.
fn failure_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let field = parsed
        .as_ref()
        .and_then(|v| v.get("detail").or_else(|| v.get("message")));

    match field {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => "Recognition error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Multipart, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/recognize-face")
    }

    async fn record_fields(State(seen): State<Seen>, mut multipart: Multipart) -> Json<Value> {
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.unwrap().to_vec();
            seen.lock().unwrap().push((name, bytes));
        }
        Json(json!({
            "faces": [
                {"face_id": 0, "position": {"x": 1, "y": 2, "width": 3, "height": 4},
                 "matches": [{"name": "Ada", "similarity": 0.91, "id": "a1"}]},
                {"face_id": 1, "matches": []}
            ],
            "total_faces_detected": 2
        }))
    }

    fn frame() -> Frame {
        Frame::jpeg(vec![0xFF, 0xD8, 0xFF])
    }

    #[tokio::test]
    async fn sends_image_and_parameters_and_parses_faces() {
        let seen: Seen = Arc::default();
        let router = Router::new()
            .route("/recognize-face", post(record_fields))
            .with_state(Arc::clone(&seen));
        let client = RecognitionClient::new(spawn_upstream(router).await).unwrap();

        let resp = client
            .recognize(&frame(), &RecognitionParams::default())
            .await
            .unwrap();

        assert_eq!(resp.faces.len(), 2);
        assert_eq!(resp.faces[0].candidates[0].name, "Ada");
        assert!(resp.faces[1].candidates.is_empty());

        let seen = seen.lock().unwrap();
        let field = |name: &str| {
            seen.iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| panic!("missing field {name}"))
        };
        assert_eq!(field("image"), vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(field("similarity_threshold"), b"0.65".to_vec());
        assert_eq!(field("max_faces"), b"5".to_vec());
        assert_eq!(field("max_results"), b"3".to_vec());
    }

    #[tokio::test]
    async fn no_face_detail_maps_to_no_face_detected() {
        let router = Router::new().route(
            "/recognize-face",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"detail": "No face detected in the image"})),
                )
            }),
        );
        let client = RecognitionClient::new(spawn_upstream(router).await).unwrap();
        let err = client
            .recognize(&frame(), &RecognitionParams::default())
            .await
            .unwrap_err();
        assert_eq!(err, FaceError::NoFaceDetected);
    }

    #[tokio::test]
    async fn other_failures_carry_status_and_detail() {
        let router = Router::new().route(
            "/recognize-face",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"detail": "database unavailable"})),
                )
            }),
        );
        let client = RecognitionClient::new(spawn_upstream(router).await).unwrap();
        let err = client
            .recognize(&frame(), &RecognitionParams::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FaceError::RecognitionService {
                status: Some(500),
                message: "database unavailable".into()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_service_is_recognition_error_without_status() {
        let client = RecognitionClient::new("http://127.0.0.1:1/recognize-face").unwrap();
        let err = client
            .recognize(&frame(), &RecognitionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FaceError::RecognitionService { status: None, .. }
        ));
    }

    #[test]
    fn proxy_error_body_uses_message_field() {
        let err = classify_failure(
            500,
            r#"{"error":true,"message":"Error connecting to face recognition service"}"#,
        );
        assert_eq!(
            err,
            FaceError::RecognitionService {
                status: Some(500),
                message: "Error connecting to face recognition service".into()
            }
        );
    }

    #[test]
    fn empty_body_falls_back_to_generic_message() {
        let err = classify_failure(502, "");
        assert_eq!(
            err,
            FaceError::RecognitionService {
                status: Some(502),
                message: "Recognition error".into()
            }
        );
    }
}
