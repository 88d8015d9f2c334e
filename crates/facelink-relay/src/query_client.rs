//! [`QueryClient`] – JSON client for the answering service.
//!
//! `POST {"message": "..."}` → `{"answer": "...", "sources": [{"content": "..."}]}`.

use std::time::Duration;

use async_trait::async_trait;
use facelink_types::{FaceError, Source};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound for one answering-service call.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(120);

/// Successful answering-service reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    message: &'a str,
}

/// Anything that answers a free-text question.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn ask(&self, message: &str) -> Result<QueryAnswer, FaceError>;
}

/// HTTP implementation of [`QueryBackend`].
pub struct QueryClient {
    endpoint: String,
    client: reqwest::Client,
}

impl QueryClient {
    /// # Errors
    ///
    /// Returns [`FaceError::Config`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, FaceError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_QUERY_TIMEOUT)
            .build()
            .map_err(|e| FaceError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl QueryBackend for QueryClient {
    async fn ask(&self, message: &str) -> Result<QueryAnswer, FaceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&QueryRequest { message })
            .send()
            .await
            .map_err(|e| FaceError::QueryService {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FaceError::QueryService {
                status: Some(status.as_u16()),
                message: detail_of(&body),
            });
        }

        response
            .json::<QueryAnswer>()
            .await
            .map_err(|e| FaceError::QueryService {
                status: Some(status.as_u16()),
                message: format!("malformed response: {e}"),
            })
    }
}

fn detail_of(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        _ if body.trim().is_empty() => "Query service error".to_string(),
        _ => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/query")
    }

    #[tokio::test]
    async fn posts_message_and_parses_answer() {
        let router = Router::new().route(
            "/query",
            post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "answer": format!("echo: {}", body["message"].as_str().unwrap_or("")),
                    "sources": [{"content": "registry.csv"}]
                }))
            }),
        );
        let client = QueryClient::new(spawn_upstream(router).await).unwrap();
        let answer = client.ask("who is Ada?").await.unwrap();
        assert_eq!(answer.answer, "echo: who is Ada?");
        assert_eq!(answer.sources[0].content, "registry.csv");
    }

    #[tokio::test]
    async fn missing_sources_default_to_empty() {
        let router = Router::new().route(
            "/query",
            post(|| async { Json(json!({"answer": "42"})) }),
        );
        let client = QueryClient::new(spawn_upstream(router).await).unwrap();
        assert!(client.ask("q").await.unwrap().sources.is_empty());
    }

    #[tokio::test]
    async fn non_success_maps_to_query_service_error() {
        let router = Router::new().route(
            "/query",
            post(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"detail": "RAG engine is not initialized"})),
                )
            }),
        );
        let client = QueryClient::new(spawn_upstream(router).await).unwrap();
        let err = client.ask("q").await.unwrap_err();
        assert_eq!(
            err,
            FaceError::QueryService {
                status: Some(503),
                message: "RAG engine is not initialized".into()
            }
        );
    }

    #[test]
    fn plain_text_body_is_used_verbatim() {
        assert_eq!(detail_of(" gateway timeout \n"), "gateway timeout");
        assert_eq!(detail_of(""), "Query service error");
    }
}
