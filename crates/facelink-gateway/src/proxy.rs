//! Multipart forwarding to the recognition service.
//!
//! The gateway buffers the incoming form, optionally adds recognition
//! defaults, re-encodes it for the upstream and relays the upstream status
//! and body back untouched.  Only a transport failure (no upstream response at
//! all) is answered by the gateway itself.

use std::time::Duration;

use axum::extract::Multipart;
use axum::http::StatusCode;
use facelink_types::{FaceError, RecognitionParams};
use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};

/// Message returned when the upstream cannot be reached.
pub const UPSTREAM_UNREACHABLE: &str = "Error connecting to face recognition service";

// ─────────────────────────────────────────────────────────────────────────────
// Buffered form
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    File {
        file_name: String,
        content_type: Option<String>,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub value: FieldValue,
}

/// An incoming multipart form held in memory, field order preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardedForm {
    fields: Vec<FormField>,
}

impl ForwardedForm {
    /// Drain an axum multipart body.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::Protocol`] if the body is not valid multipart.
    pub async fn read(mut multipart: Multipart) -> Result<Self, FaceError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| FaceError::Protocol(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| FaceError::Protocol(e.body_text()))?
                .to_vec();

            let value = match file_name {
                Some(file_name) => FieldValue::File {
                    file_name,
                    content_type,
                    data,
                },
                None => FieldValue::Text(String::from_utf8_lossy(&data).into_owned()),
            };
            form.fields.push(FormField { name, value });
        }
        Ok(form)
    }

    pub fn push_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(FormField {
            name: name.into(),
            value: FieldValue::Text(value.into()),
        });
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    /// `true` if a file part called `name` is present.
    pub fn has_file(&self, name: &str) -> bool {
        self.fields
            .iter()
            .any(|f| f.name == name && matches!(f.value, FieldValue::File { .. }))
    }

    /// `true` if a non-blank text part called `name` is present.
    pub fn has_text(&self, name: &str) -> bool {
        self.fields.iter().any(|f| {
            f.name == name && matches!(&f.value, FieldValue::Text(v) if !v.trim().is_empty())
        })
    }

    /// Append `max_faces` and `similarity_threshold` when the caller left
    /// them out.  `max_results` is left to the service.
    pub fn with_recognition_defaults(mut self) -> Self {
        let defaults = RecognitionParams::default();
        if !self.has_text("max_faces") {
            self.push_text("max_faces", defaults.max_faces.to_string());
        }
        if !self.has_text("similarity_threshold") {
            self.push_text(
                "similarity_threshold",
                defaults.similarity_threshold.to_string(),
            );
        }
        self
    }

    fn into_upstream(self) -> Result<Form, FaceError> {
        let mut form = Form::new();
        for field in self.fields {
            form = match field.value {
                FieldValue::Text(text) => form.text(field.name, text),
                FieldValue::File {
                    file_name,
                    content_type,
                    data,
                } => {
                    let mime = content_type.unwrap_or_else(|| "application/octet-stream".into());
                    let part = Part::bytes(data)
                        .file_name(file_name)
                        .mime_str(&mime)
                        .map_err(|e| FaceError::Protocol(format!("bad content type {mime}: {e}")))?;
                    form.part(field.name, part)
                }
            };
        }
        Ok(form)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Forwarder
// ─────────────────────────────────────────────────────────────────────────────

/// Upstream answer relayed verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Posts [`ForwardedForm`]s to one upstream endpoint.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    url: String,
    timeout: Option<Duration>,
}

impl Forwarder {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            timeout: None,
        }
    }

    /// Bound each forwarded request (builder-style).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Forward `form` and return the upstream reply.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::RecognitionService`] without a status when no
    /// upstream response arrived, or [`FaceError::Protocol`] when the form
    /// cannot be re-encoded.
    pub async fn forward(&self, form: ForwardedForm) -> Result<UpstreamReply, FaceError> {
        let mut request = self.client.post(&self.url).multipart(form.into_upstream()?);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let unreachable = |e: reqwest::Error| {
            warn!(url = %self.url, error = %e, "upstream request failed");
            FaceError::RecognitionService {
                status: None,
                message: e.to_string(),
            }
        };

        let response = request.send().await.map_err(unreachable)?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(unreachable)?.to_vec();

        debug!(url = %self.url, %status, bytes = body.len(), "upstream replied");
        Ok(UpstreamReply {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> FormField {
        FormField {
            name: "image".into(),
            value: FieldValue::File {
                file_name: "face.jpg".into(),
                content_type: Some("image/jpeg".into()),
                data: vec![1, 2, 3],
            },
        }
    }

    fn text_values<'a>(form: &'a ForwardedForm, name: &str) -> Vec<&'a str> {
        form.fields()
            .iter()
            .filter(|f| f.name == name)
            .filter_map(|f| match &f.value {
                FieldValue::Text(v) => Some(v.as_str()),
                FieldValue::File { .. } => None,
            })
            .collect()
    }

    #[test]
    fn defaults_are_added_when_absent() {
        let form = ForwardedForm {
            fields: vec![image()],
        }
        .with_recognition_defaults();

        assert!(form.has_file("image"));
        assert_eq!(text_values(&form, "max_faces"), vec!["5"]);
        assert_eq!(text_values(&form, "similarity_threshold"), vec!["0.65"]);
        assert!(text_values(&form, "max_results").is_empty());
    }

    #[test]
    fn caller_values_are_kept() {
        let mut form = ForwardedForm {
            fields: vec![image()],
        };
        form.push_text("max_faces", "2");
        form.push_text("similarity_threshold", "0.8");
        let form = form.with_recognition_defaults();

        assert_eq!(text_values(&form, "max_faces"), vec!["2"]);
        assert_eq!(text_values(&form, "similarity_threshold"), vec!["0.8"]);
    }

    #[test]
    fn blank_value_counts_as_absent() {
        let mut form = ForwardedForm::default();
        form.push_text("max_faces", " ");
        assert!(!form.has_text("max_faces"));
        let form = form.with_recognition_defaults();
        assert_eq!(text_values(&form, "max_faces"), vec![" ", "5"]);
    }

    #[test]
    fn text_field_is_not_a_file() {
        let mut form = ForwardedForm::default();
        form.push_text("image", "not really");
        assert!(!form.has_file("image"));
    }
}
