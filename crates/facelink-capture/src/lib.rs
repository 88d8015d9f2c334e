//! `facelink-capture` – the live recognition loop.
//!
//! # Modules
//!
//! - [`source`] – [`FrameSource`][source::FrameSource]: anything that can hand
//!   over an encoded image on demand, plus a
//!   [`DirectorySource`][source::DirectorySource] that cycles through image
//!   files.
//! - [`recognition_client`] – [`Recognizer`][recognition_client::Recognizer]
//!   and its HTTP implementation
//!   [`RecognitionClient`][recognition_client::RecognitionClient], which posts
//!   a multipart frame to the recognition service and classifies failures.
//! - [`aggregator`] – turns a multi-face response into ranked
//!   [`RecognitionResult`][facelink_types::RecognitionResult]s.
//! - [`scheduler`] – [`CaptureScheduler`][scheduler::CaptureScheduler]: the
//!   single-flight periodic driver with start/stop and live cadence changes.

pub mod aggregator;
pub mod recognition_client;
pub mod scheduler;
pub mod source;

pub use aggregator::aggregate;
pub use recognition_client::{RecognitionClient, Recognizer, DEFAULT_RECOGNITION_TIMEOUT};
pub use scheduler::{CaptureScheduler, CaptureSnapshot, ScheduleConfig, INTERVAL_PRESETS};
pub use source::{DirectorySource, FrameSource};
