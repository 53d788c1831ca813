//! Session Orchestrator
//!
//! Owns the top-level mutable session state and wires the analysis poller
//! and speech intake so they start together and stop together. Mute and
//! language changes propagate from here; nothing below mutates session
//! state on its own.

use crate::config::Config;
use crate::frame::FrameSource;
use crate::intake::{ConnectionPhase, IntakeHandle, SpeechIntake, SpeechProvider};
use crate::ledger::{ContextEntry, ContextKind, ContextLedger};
use crate::poller::{AnalysisPoller, PollerHandle};
use crate::vision::VisionBackend;
use crate::voice::{AudioOutput, SpeechBackend, VoicePlayer};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Top-level mutable session state, owned exclusively by the orchestrator
#[derive(Debug, Clone)]
pub struct SessionState {
    pub is_muted: bool,
    pub language: String,
    pub auto_voice_enabled: bool,
    pub manually_stopped: bool,
    pub frame_type: String,
}

/// The slice of session state the poller reads on each tick
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub target_vibe: String,
    pub language: String,
    pub is_muted: bool,
}

/// Settings a coaching session starts with
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub language: String,
    pub target_vibe: String,
    pub frame_type: String,
    pub auto_voice_enabled: bool,
    pub muted: bool,
    pub poll_interval: Duration,
    pub speak_confidence: f32,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            language: config.language.clone(),
            target_vibe: config.target_vibe.clone(),
            frame_type: config.frame_type.clone(),
            auto_voice_enabled: config.auto_voice_enabled,
            muted: false,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            speak_confidence: config.speak_confidence,
        }
    }
}

/// A live coaching session: poller + speech intake + voice output
pub struct CoachSession {
    state: SessionState,
    target_vibe: String,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    ledger: Arc<Mutex<ContextLedger>>,
    voice: Arc<VoicePlayer>,
    intake: IntakeHandle,
    poller: PollerHandle,
}

impl CoachSession {
    /// Wire everything together and start both the poller and the intake
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        vision: Arc<dyn VisionBackend>,
        frames: Arc<dyn FrameSource>,
        speech: Arc<dyn SpeechBackend>,
        output: Arc<dyn AudioOutput>,
        primary: Box<dyn SpeechProvider>,
        fallback: Option<Box<dyn SpeechProvider>>,
        options: SessionOptions,
    ) -> Self {
        let ledger = Arc::new(Mutex::new(ContextLedger::new()));
        if let Ok(mut l) = ledger.lock() {
            l.push_entry(
                ContextKind::Environment,
                "setting",
                &format!(
                    "{} frame, aiming for {}",
                    options.frame_type, options.target_vibe
                ),
            );
        }
        let voice = Arc::new(VoicePlayer::new(speech, output));

        let intake = SpeechIntake::spawn(
            primary,
            fallback,
            ledger.clone(),
            options.language.clone(),
            options.auto_voice_enabled,
        );

        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            target_vibe: options.target_vibe.clone(),
            language: options.language.clone(),
            is_muted: options.muted,
        });

        let poller = Arc::new(AnalysisPoller::new(
            vision,
            frames,
            voice.clone(),
            ledger.clone(),
            intake.topic_watch(),
            snapshot_rx,
            options.poll_interval,
            options.speak_confidence,
        ))
        .spawn();

        if options.auto_voice_enabled {
            intake.start().await;
        }

        info!("🎬 Coaching session started (vibe: {})", options.target_vibe);

        Self {
            state: SessionState {
                is_muted: options.muted,
                language: options.language,
                auto_voice_enabled: options.auto_voice_enabled,
                manually_stopped: false,
                frame_type: options.frame_type,
            },
            target_vibe: options.target_vibe,
            snapshot_tx,
            ledger,
            voice,
            intake,
            poller,
        }
    }

    /// Toggle mute; muting also cuts any suggestion currently playing
    pub fn set_muted(&mut self, muted: bool) {
        self.state.is_muted = muted;
        if muted {
            self.voice.stop();
        }
        self.publish_snapshot();
    }

    /// Change recognition language; forwarded to the intake and used as
    /// the poller's language hint on its next request
    pub async fn set_language(&mut self, language: &str) {
        self.state.language = language.to_string();
        self.publish_snapshot();
        self.intake.set_language(language).await;
    }

    pub async fn set_auto_voice(&mut self, enabled: bool) {
        self.state.auto_voice_enabled = enabled;
        self.state.manually_stopped = !enabled;
        self.intake.set_auto_voice(enabled).await;
    }

    /// Cosmetic only; no effect on polling or listening invariants
    pub fn set_frame_type(&mut self, frame_type: &str) {
        self.state.frame_type = frame_type.to_string();
    }

    /// Manually stop listening without ending the session
    pub async fn stop_listening(&mut self) {
        self.state.manually_stopped = true;
        self.intake.stop().await;
    }

    /// Resume listening after a manual stop
    pub async fn start_listening(&mut self) {
        self.state.manually_stopped = false;
        self.intake.start().await;
    }

    /// Screen teardown: stop the polling loop, fully stop the intake, and
    /// cut any active audio
    pub async fn shutdown(&mut self) {
        self.state.manually_stopped = true;
        self.poller.stop();
        self.intake.shutdown().await;
        self.voice.stop();
        info!("🛑 Coaching session shut down");
    }

    fn publish_snapshot(&self) {
        let _ = self.snapshot_tx.send(SessionSnapshot {
            target_vibe: self.target_vibe.clone(),
            language: self.state.language.clone(),
            is_muted: self.state.is_muted,
        });
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.intake.phase()
    }

    /// The context entries surfaced to the coaching view
    pub fn visible_context(&self) -> Vec<ContextEntry> {
        self.ledger
            .lock()
            .map(|l| l.visible())
            .unwrap_or_default()
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.ledger
            .lock()
            .map(|l| l.diagnostics())
            .unwrap_or_default()
    }

    /// Live partial-recognition text for the view
    pub fn current_text(&self) -> String {
        self.intake.text_watch().borrow().clone()
    }
}
