//! Frame Analysis Poller
//!
//! Fixed-cadence, non-overlapping polling loop. Each tick grabs the
//! latest frame, calls the vision endpoint with the current vibe, topic,
//! and language hint, and fans the result into the context ledger and the
//! voice player. Excess ticks are dropped, never buffered; the next tick
//! is scheduled from completion, so slow responses cannot pile up.

use crate::frame::FrameSource;
use crate::ledger::{ContextKind, ContextLedger};
use crate::session::SessionSnapshot;
use crate::vision::{AnalyzeRequest, Suggestion, VisionBackend};
use crate::voice::VoicePlayer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default cadence between analysis ticks, measured from completion
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(7000);

/// Shown in place of a real cue when the endpoint fails
pub const FALLBACK_VISUAL_CUE: &str = "unreadable expression";

/// Bound on the suggestion preview stored in the ledger
pub const ANALYSIS_PREVIEW_LEN: usize = 120;

#[derive(Debug, Default)]
struct PollState {
    last_suggestion: Option<Suggestion>,
    last_spoken: Option<String>,
}

pub struct AnalysisPoller {
    vision: Arc<dyn VisionBackend>,
    frames: Arc<dyn FrameSource>,
    voice: Arc<VoicePlayer>,
    ledger: Arc<Mutex<ContextLedger>>,
    topic: watch::Receiver<String>,
    session: watch::Receiver<SessionSnapshot>,
    interval: Duration,
    speak_confidence: f32,
    in_flight: AtomicBool,
    state: Mutex<PollState>,
}

/// Clears the in-flight guard on every exit path
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AnalysisPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vision: Arc<dyn VisionBackend>,
        frames: Arc<dyn FrameSource>,
        voice: Arc<VoicePlayer>,
        ledger: Arc<Mutex<ContextLedger>>,
        topic: watch::Receiver<String>,
        session: watch::Receiver<SessionSnapshot>,
        interval: Duration,
        speak_confidence: f32,
    ) -> Self {
        Self {
            vision,
            frames,
            voice,
            ledger,
            topic,
            session,
            interval,
            speak_confidence,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(PollState::default()),
        }
    }

    /// One analysis tick. Skips silently when no frame is available and
    /// drops the tick entirely while a previous call is still in flight.
    pub async fn tick(&self) {
        let Some(frame) = self.frames.capture_frame() else {
            return;
        };

        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Analysis still in flight, dropping tick");
            return;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let snapshot = self.session.borrow().clone();
        let topic = self.topic.borrow().clone();

        self.push_diagnostic(&format!("🔍 Scanning frame (vibe: {})", snapshot.target_vibe));

        let request = AnalyzeRequest {
            frame,
            target_vibe: snapshot.target_vibe.clone(),
            current_topic: topic,
            language_hint: snapshot.language.clone(),
        };

        match self.vision.analyze(&request).await {
            Ok(suggestion) => {
                self.record_success(&suggestion, &snapshot);
                self.maybe_speak(&suggestion).await;
            }
            Err(e) => {
                warn!("Frame analysis failed (recovered): {}", e);
                self.record_failure(&e.to_string());
            }
        }
    }

    fn record_success(&self, suggestion: &Suggestion, snapshot: &SessionSnapshot) {
        if let Ok(mut state) = self.state.lock() {
            state.last_suggestion = Some(suggestion.clone());
        }

        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.push_entry(ContextKind::VisualCue, "visual cue", &suggestion.visual_cue);
            ledger.push_entry(
                ContextKind::Analysis,
                "suggestion",
                &truncate_preview(&suggestion.suggestion),
            );
            ledger.push_entry(
                ContextKind::Emotion,
                "read",
                &format!(
                    "confidence {:.2}, aiming for {}",
                    suggestion.confidence, snapshot.target_vibe
                ),
            );
            ledger.push_diagnostic(&format!(
                "✅ Cue '{}' (confidence {:.2})",
                suggestion.visual_cue, suggestion.confidence
            ));
        }
    }

    fn record_failure(&self, message: &str) {
        self.push_diagnostic(&format!("❌ Scan failed: {}", message));

        // Substitute the fixed fallback cue; the session keeps going
        if let Ok(mut state) = self.state.lock() {
            match &mut state.last_suggestion {
                Some(s) => s.visual_cue = FALLBACK_VISUAL_CUE.to_string(),
                None => {
                    state.last_suggestion = Some(Suggestion {
                        suggestion: String::new(),
                        visual_cue: FALLBACK_VISUAL_CUE.to_string(),
                        confidence: 0.0,
                    })
                }
            }
        }
    }

    /// Speak only confident, fresh suggestions. Mute is re-read here, not
    /// taken from the tick's snapshot, so a mute that lands while the
    /// analyze call is in flight silences the resolving tick too.
    async fn maybe_speak(&self, suggestion: &Suggestion) {
        if suggestion.confidence < self.speak_confidence || suggestion.suggestion.is_empty() {
            return;
        }

        let already_spoken = self
            .state
            .lock()
            .map(|s| s.last_spoken.as_deref() == Some(suggestion.suggestion.as_str()))
            .unwrap_or(true);
        if already_spoken {
            return;
        }

        if let Ok(mut state) = self.state.lock() {
            state.last_spoken = Some(suggestion.suggestion.clone());
        }
        let muted = self.session.borrow().is_muted;
        self.voice.speak(&suggestion.suggestion, muted).await;
    }

    fn push_diagnostic(&self, line: &str) {
        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.push_diagnostic(line);
        }
    }

    pub fn last_suggestion(&self) -> Option<Suggestion> {
        self.state.lock().ok().and_then(|s| s.last_suggestion.clone())
    }

    pub fn last_spoken(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.last_spoken.clone())
    }

    /// Start the self-rescheduling loop
    pub fn spawn(self: Arc<Self>) -> PollerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let poller = self;
        let task = tokio::spawn(async move {
            loop {
                if *stop_rx.borrow() {
                    break;
                }

                poller.tick().await;

                // Reschedule from completion, not from trigger
                tokio::select! {
                    _ = tokio::time::sleep(poller.interval) => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Analysis poller stopped");
        });

        PollerHandle {
            stop: stop_tx,
            _task: task,
        }
    }
}

/// Handle to a running poller loop
pub struct PollerHandle {
    stop: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

impl PollerHandle {
    /// Cancel the next scheduled tick; an in-flight call settles naturally
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

fn truncate_preview(text: &str) -> String {
    text.chars().take(ANALYSIS_PREVIEW_LEN).collect()
}
