//! Voice output (TTS playback manager)
//!
//! Single-flight audio player with cancel-and-replace semantics: at most
//! one playable handle is active, and starting a new one stops and
//! releases the previous one first. Everything here is best-effort:
//! errors are logged and dropped, never escalated to the session.

use crate::error::CoachResult;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub mod http;
pub mod output;

pub use http::HttpSpeechBackend;
pub use output::RodioOutput;

/// Backend that turns text into audio bytes. An empty result means the
/// endpoint had nothing to say, which is a legitimate no-op.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn synthesize(&self, text: &str) -> CoachResult<Vec<u8>>;
}

/// A live playback resource. Exactly one may be active at a time.
pub trait PlaybackHandle: Send {
    /// Stop playback and release the underlying resource
    fn stop(&mut self);

    fn is_finished(&self) -> bool;
}

/// Audio output seam that starts playback of encoded audio bytes
pub trait AudioOutput: Send + Sync {
    fn start(&self, audio: Vec<u8>) -> CoachResult<Box<dyn PlaybackHandle>>;
}

/// Single-flight voice player owning the exclusive active handle
pub struct VoicePlayer {
    backend: Arc<dyn SpeechBackend>,
    output: Arc<dyn AudioOutput>,
    active: Mutex<Option<Box<dyn PlaybackHandle>>>,
}

impl VoicePlayer {
    pub fn new(backend: Arc<dyn SpeechBackend>, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            backend,
            output,
            active: Mutex::new(None),
        }
    }

    /// Speak `text` unless muted. Muted calls return immediately with no
    /// network traffic. All failures are swallowed after logging.
    pub async fn speak(&self, text: &str, muted: bool) {
        if muted {
            debug!("🔇 Muted, skipping speech: '{}'", text);
            return;
        }

        let audio = match self.backend.synthesize(text).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("TTS synthesis failed (ignored): {}", e);
                return;
            }
        };

        if audio.is_empty() {
            debug!("TTS endpoint had nothing to say");
            return;
        }

        // Exclusive ownership: release the previous handle before the new
        // one exists
        let mut slot = match self.active.lock() {
            Ok(s) => s,
            Err(e) => {
                warn!("Voice player lock poisoned (ignored): {}", e);
                return;
            }
        };
        if let Some(mut previous) = slot.take() {
            // A handle that already played to its end just needs releasing
            if !previous.is_finished() {
                previous.stop();
            }
        }

        match self.output.start(audio) {
            Ok(handle) => *slot = Some(handle),
            Err(e) => warn!("Audio playback failed (ignored): {}", e),
        }
    }

    /// Stop and release the active playback, if any
    pub fn stop(&self) {
        if let Ok(mut slot) = self.active.lock() {
            if let Some(mut handle) = slot.take() {
                handle.stop();
            }
        }
    }

    /// Whether something is currently held as active (it may have
    /// finished on its own)
    pub fn has_active_handle(&self) -> bool {
        self.active.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}
