//! `facelink-types` – shared vocabulary of the FaceLink workspace.
//!
//! - [`recognition`] – frames, per-face observations, candidates and the
//!   display-ready [`RecognitionResult`].
//! - [`relay`] – relay session states, messages and the JSON wire frames
//!   exchanged with the UI layer.
//! - [`error`] – the crate-wide [`FaceError`] taxonomy.

pub mod error;
pub mod recognition;
pub mod relay;

pub use error::{ErrorKind, FaceError};
pub use recognition::{
    BoundingBox, Candidate, FaceObservation, Frame, RecognitionParams, RecognitionResponse,
    RecognitionResult,
};
pub use relay::{
    ClientFrame, RelayMessage, ServerFrame, SessionState, Source, WireKind, WireMessage,
    PROCESSING_NOTICE,
};
