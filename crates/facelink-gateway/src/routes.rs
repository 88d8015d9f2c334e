//! HTTP routes of the gateway.
//!
//! ## Endpoints
//! - `GET /api` - service banner
//! - `POST /api/recognize` - forward a frame to the recognition service
//! - `POST /api/register` - forward a registration form unchanged

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::proxy::{ForwardedForm, Forwarder, UPSTREAM_UNREACHABLE, UpstreamReply};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const NO_IMAGE: &str = "No image provided for recognition";

/// Shared handler state.
#[derive(Clone)]
pub struct GatewayState {
    pub recognize: Arc<Forwarder>,
    pub register: Arc<Forwarder>,
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/api", get(service_info))
        .route("/api/recognize", post(recognize))
        .route("/api/register", post(register))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// GET /api
async fn service_info() -> impl IntoResponse {
    Json(json!({
        "message": "FaceLink gateway is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /api/recognize
///
/// Requires an `image` file part.  `max_faces` and `similarity_threshold`
/// get defaults when missing; everything else is forwarded as sent.
async fn recognize(State(state): State<GatewayState>, multipart: Multipart) -> Response {
    let form = match ForwardedForm::read(multipart).await {
        Ok(form) => form,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    if !form.has_file("image") {
        tracing::info!("recognition request without image rejected");
        return error_body(StatusCode::BAD_REQUEST, NO_IMAGE);
    }

    tracing::info!(fields = form.fields().len(), "forwarding recognition request");
    relay(&state.recognize, form.with_recognition_defaults()).await
}

/// POST /api/register
async fn register(State(state): State<GatewayState>, multipart: Multipart) -> Response {
    let form = match ForwardedForm::read(multipart).await {
        Ok(form) => form,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    tracing::info!(fields = form.fields().len(), "forwarding registration request");
    relay(&state.register, form).await
}

async fn relay(forwarder: &Forwarder, form: ForwardedForm) -> Response {
    match forwarder.forward(form).await {
        Ok(reply) => passthrough(reply),
        Err(e) => {
            tracing::error!(url = %forwarder.url(), error = %e, "upstream unreachable");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, UPSTREAM_UNREACHABLE)
        }
    }
}

fn passthrough(reply: UpstreamReply) -> Response {
    let content_type = reply
        .content_type
        .unwrap_or_else(|| "application/json".to_string());
    (reply.status, [(header::CONTENT_TYPE, content_type)], reply.body).into_response()
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": true, "message": message }))).into_response()
}
