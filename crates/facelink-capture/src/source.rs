//! Generic `FrameSource` trait and a directory-backed implementation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use facelink_types::{FaceError, Frame};

/// A camera or other producer of encoded image frames.
pub trait FrameSource: Send + Sync {
    /// Stable identifier for this source, e.g. `"webcam0"`.
    fn id(&self) -> &str;

    /// Capture the next frame.  The scheduler calls this on the blocking
    /// thread pool, so implementations may do synchronous I/O.
    ///
    /// `Ok(None)` means no frame is available right now (e.g. the device is
    /// still warming up); the caller skips the cycle without raising an error.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::Source`] if the device or file cannot be read.
    fn capture(&self) -> Result<Option<Frame>, FaceError>;
}

/// Replays the image files of a directory in name order, wrapping around.
pub struct DirectorySource {
    id: String,
    files: Vec<PathBuf>,
    cursor: AtomicUsize,
}

impl DirectorySource {
    /// Scan `dir` for `.jpg`, `.jpeg` and `.png` files.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::Source`] if the directory cannot be listed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, FaceError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| FaceError::Source(format!("cannot list {}: {e}", dir.display())))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| mime_for(path).is_some())
            .collect();
        files.sort();

        Ok(Self {
            id: dir.display().to_string(),
            files,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Number of image files found at open time.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&self) -> Result<Option<Frame>, FaceError> {
        if self.files.is_empty() {
            return Ok(None);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.files.len();
        let path = &self.files[index];
        let data = std::fs::read(path)
            .map_err(|e| FaceError::Source(format!("cannot read {}: {e}", path.display())))?;

        Ok(Some(Frame {
            data,
            mime: mime_for(path).unwrap_or("image/jpeg").to_string(),
            captured_at: Utc::now(),
        }))
    }
}

fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}
