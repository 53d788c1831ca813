//! Frame source abstraction
//!
//! The camera itself is an external collaborator; the core only needs
//! "give me the latest frame, or nothing".

use std::path::PathBuf;
use tracing::debug;

/// Source of camera frames for the analysis poller
pub trait FrameSource: Send + Sync {
    /// Return the latest frame as encoded image bytes, or `None` if no
    /// frame is currently available. A `None` tick is silently skipped.
    fn capture_frame(&self) -> Option<Vec<u8>>;
}

/// Frame source reading the newest image dropped into a directory by a
/// companion capture tool.
pub struct FileFrameSource {
    dir: PathBuf,
}

impl FileFrameSource {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn newest_image(&self) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.dir).ok()?;

        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_image = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("jpg") | Some("jpeg") | Some("png")
            );
            if !is_image {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            match &newest {
                Some((ts, _)) if *ts >= modified => {}
                _ => newest = Some((modified, path)),
            }
        }

        newest.map(|(_, path)| path)
    }
}

impl FrameSource for FileFrameSource {
    fn capture_frame(&self) -> Option<Vec<u8>> {
        let path = self.newest_image()?;
        match std::fs::read(&path) {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                debug!("Frame read failed for {:?}: {}", path, e);
                None
            }
        }
    }
}
