//! Local fallback recognizer (vosk)
//!
//! Continuous offline recognition used when the cloud provider is
//! unavailable. Vosk models are monolingual, so a language change reopens
//! with the model configured for that tag. A missing model means the
//! fallback facility is simply absent and the session degrades silently.

use super::{ProviderConnection, ProviderEvent, SpeechEvent, SpeechProvider};
use crate::audio::{self, calculate_energy};
use crate::config::Config;
use crate::error::{CoachError, CoachResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use vosk::{Model, Recognizer};

const SAMPLE_RATE: f32 = 16000.0;

/// Chunks below this energy are skipped between utterances
const SILENCE_ENERGY: f32 = 60.0;

pub struct LocalProvider {
    config: Config,
    device_index: Option<usize>,
}

impl LocalProvider {
    pub fn new(config: &Config, device_index: Option<usize>) -> Self {
        Self {
            config: config.clone(),
            device_index,
        }
    }
}

#[async_trait]
impl SpeechProvider for LocalProvider {
    async fn open(
        &mut self,
        language: &str,
        events: mpsc::Sender<ProviderEvent>,
        generation: u64,
    ) -> CoachResult<Box<dyn ProviderConnection>> {
        let model_path = self.config.fallback_model_for(language).to_string();
        if !std::path::Path::new(&model_path).exists() {
            return Err(CoachError::FallbackUnsupported(format!(
                "no vosk model at {}",
                model_path
            )));
        }

        let mut capture = audio::start_capture(self.device_index)?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        info!("Loading vosk model from: {}", model_path);

        let task = tokio::task::spawn_blocking(move || {
            let send = |event: SpeechEvent| {
                let _ = events.blocking_send(ProviderEvent { generation, event });
            };

            let Some(model) = Model::new(&model_path) else {
                send(SpeechEvent::Error(format!(
                    "failed to load vosk model at {}",
                    model_path
                )));
                return;
            };
            let Some(mut recognizer) = Recognizer::new(&model, SAMPLE_RATE) else {
                send(SpeechEvent::Error("failed to create recognizer".to_string()));
                return;
            };

            let mut voiced = false;
            let mut last_partial = String::new();

            loop {
                if stop_flag.load(Ordering::SeqCst) {
                    debug!("Local recognizer stopping on request");
                    break;
                }

                let Some(chunk) = capture.blocking_next_chunk() else {
                    // Capture stream gone: natural end of the session
                    send(SpeechEvent::Ended);
                    break;
                };

                // Skip dead air between utterances; keep feeding once an
                // utterance has started so vosk can finalize on silence
                if !voiced && calculate_energy(&chunk) < SILENCE_ENERGY {
                    continue;
                }
                voiced = true;

                match recognizer.accept_waveform(&chunk) {
                    vosk::DecodingState::Finalized => {
                        voiced = false;
                        last_partial.clear();
                        if let Some(single) = recognizer.final_result().single() {
                            let text = single.text.trim();
                            if !text.is_empty() {
                                send(SpeechEvent::Committed(text.to_string()));
                            }
                        }
                    }
                    vosk::DecodingState::Running => {
                        let partial = recognizer.partial_result().partial.to_string();
                        if !partial.is_empty() && partial != last_partial {
                            last_partial = partial.clone();
                            send(SpeechEvent::Partial(partial));
                        }
                    }
                    vosk::DecodingState::Failed => {
                        debug!("Decoding failed for this chunk");
                    }
                }
            }
        });

        Ok(Box::new(LocalConnection { stop, _task: task }))
    }
}

struct LocalConnection {
    stop: Arc<AtomicBool>,
    _task: JoinHandle<()>,
}

#[async_trait]
impl ProviderConnection for LocalConnection {
    async fn close(&mut self) {
        // Best-effort: flag the blocking loop; it exits within one chunk
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
