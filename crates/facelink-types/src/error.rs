use thiserror::Error;

/// Coarse classification surfaced to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoFaceDetected,
    RecognitionServiceError,
    NotConnected,
    QueryServiceError,
    TransportError,
    SourceError,
    ProtocolError,
    ConfigError,
}

/// Global error type spanning the capture loop, the relay and the gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaceError {
    /// The recognition service found no face in the frame. Expected while the
    /// camera points at an empty scene.
    #[error("No face detected")]
    NoFaceDetected,

    #[error("Recognition service error{}: {message}", status_suffix(.status))]
    RecognitionService { status: Option<u16>, message: String },

    /// A query was attempted while the relay session was not connected.
    #[error("Not connected")]
    NotConnected,

    #[error("Query service error{}: {message}", status_suffix(.status))]
    QueryService { status: Option<u16>, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Frame source error: {0}")]
    Source(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FaceError::NoFaceDetected => ErrorKind::NoFaceDetected,
            FaceError::RecognitionService { .. } => ErrorKind::RecognitionServiceError,
            FaceError::NotConnected => ErrorKind::NotConnected,
            FaceError::QueryService { .. } => ErrorKind::QueryServiceError,
            FaceError::Transport(_) => ErrorKind::TransportError,
            FaceError::Source(_) => ErrorKind::SourceError,
            FaceError::Protocol(_) => ErrorKind::ProtocolError,
            FaceError::Config(_) => ErrorKind::ConfigError,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognition_error_display_includes_status() {
        let err = FaceError::RecognitionService {
            status: Some(503),
            message: "model not loaded".into(),
        };
        assert_eq!(
            err.to_string(),
            "Recognition service error (HTTP 503): model not loaded"
        );
    }

    #[test]
    fn transport_failure_display_omits_status() {
        let err = FaceError::QueryService {
            status: None,
            message: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "Query service error: connection refused");
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(FaceError::NoFaceDetected.kind(), ErrorKind::NoFaceDetected);
        assert_eq!(FaceError::NotConnected.kind(), ErrorKind::NotConnected);
        assert_eq!(
            FaceError::Transport("reset".into()).kind(),
            ErrorKind::TransportError
        );
    }
}
