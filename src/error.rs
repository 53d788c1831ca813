//! VibeCoach Error Types
//!
//! Centralized error handling for the coaching session core.

use thiserror::Error;

/// Central error type for VibeCoach
#[derive(Error, Debug)]
pub enum CoachError {
    #[error("Vision endpoint error: {0}")]
    Vision(String),

    #[error("Speech provider error: {0}")]
    Speech(String),

    #[error("Session token error: {0}")]
    Token(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Audio capture error: {0}")]
    Audio(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Local recognition unavailable: {0}")]
    FallbackUnsupported(String),

    #[error("Lock poisoned: {0}")]
    Lock(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for VibeCoach operations
pub type CoachResult<T> = Result<T, CoachError>;

/// Helper to convert Mutex poison errors
impl<T> From<std::sync::PoisonError<T>> for CoachError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        CoachError::Lock(err.to_string())
    }
}
