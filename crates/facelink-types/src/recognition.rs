use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single sampled image, owned by the capture loop for one cycle.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded image bytes (JPEG unless `mime` says otherwise).
    pub data: Vec<u8>,
    /// MIME type sent with the multipart image part.
    pub mime: String,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap JPEG bytes captured right now.
    pub fn jpeg(data: Vec<u8>) -> Self {
        Self {
            data,
            mime: "image/jpeg".to_string(),
            captured_at: Utc::now(),
        }
    }
}

/// Pixel rectangle reported by the recognition service as `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One possible identity for a detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    /// Similarity score in `[0, 1]`.
    pub similarity: f32,
    /// Identifier of the registered identity.
    #[serde(rename = "id", default)]
    pub identity_id: String,
}

/// A face detected in one frame together with its server-ranked candidates.
///
/// `face_id` is only unique within a single response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub face_id: u32,
    #[serde(rename = "position", default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    /// Ordered by descending similarity.
    #[serde(rename = "matches", default)]
    pub candidates: Vec<Candidate>,
}

/// Envelope returned by the recognition service.
///
/// A body without a `faces` field decodes to an empty detection set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResponse {
    #[serde(default)]
    pub faces: Vec<FaceObservation>,
}

/// Tuning parameters sent with every recognition request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecognitionParams {
    pub similarity_threshold: f32,
    pub max_faces: u32,
    pub max_results: u32,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.65,
            max_faces: 5,
            max_results: 3,
        }
    }
}

/// Display-ready outcome for one face of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub face_id: u32,
    pub bounding_box: Option<BoundingBox>,
    pub recognized: bool,
    pub best: Option<Candidate>,
    pub alternates: Vec<Candidate>,
    /// Wall-clock time the response was aggregated.
    pub captured_at: DateTime<Utc>,
}
