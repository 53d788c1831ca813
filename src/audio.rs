//! Audio capture module using cpal
//!
//! The cpal stream is not Send, so a dedicated thread owns it and hands
//! chunks back over a channel. Dropping the `CaptureHandle` stops the
//! stream, which lets speech providers open and close the microphone
//! across reconnects without leaking sessions.

use crate::error::{CoachError, CoachResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use serde::Serialize;
use std::sync::mpsc as std_mpsc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const SAMPLE_RATE: u32 = 16000;
const CHUNK_SIZE: usize = 1024;

/// Microphone constraints passed along to speech providers
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MicConstraints {
    #[serde(rename = "echoCancellation")]
    pub echo_cancellation: bool,
    #[serde(rename = "noiseSuppression")]
    pub noise_suppression: bool,
    #[serde(rename = "autoGainControl")]
    pub auto_gain: bool,
}

impl Default for MicConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: true,
        }
    }
}

/// Owned handle to a live microphone session. At most one exists per
/// active speech-provider connection; dropping it releases the device.
pub struct CaptureHandle {
    chunks: mpsc::Receiver<Vec<i16>>,
    stop: Option<std_mpsc::Sender<()>>,
}

impl CaptureHandle {
    /// Receive the next audio chunk; `None` once the stream has stopped
    pub async fn next_chunk(&mut self) -> Option<Vec<i16>> {
        self.chunks.recv().await
    }

    /// Blocking variant for use off the async runtime (vosk task)
    pub fn blocking_next_chunk(&mut self) -> Option<Vec<i16>> {
        self.chunks.blocking_recv()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Start audio capture on a dedicated thread and return its handle
pub fn start_capture(device_index: Option<usize>) -> CoachResult<CaptureHandle> {
    let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<i16>>(32);
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();

    std::thread::spawn(move || {
        let host = cpal::default_host();

        let device = match device_index {
            Some(idx) => host.input_devices().ok().and_then(|mut d| d.nth(idx)),
            None => host.default_input_device(),
        };
        let device = match device {
            Some(d) => d,
            None => {
                let _ = ready_tx.send(Err("No audio input device".to_string()));
                return;
            }
        };

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio device: {}", device_name);

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Fixed(CHUNK_SIZE as u32),
        };

        let stream = device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                // Back-pressure drops chunks rather than blocking the
                // audio callback
                if chunk_tx.try_send(data.to_vec()).is_err() {
                    debug!("Audio chunk dropped (receiver busy or gone)");
                }
            },
            |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        );

        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                let _ = ready_tx.send(Err(format!("Failed to build input stream: {}", e)));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(format!("Failed to start input stream: {}", e)));
            return;
        }
        let _ = ready_tx.send(Ok(()));

        // Park until the handle is dropped; the stream dies with this thread
        let _ = stop_rx.recv();
        drop(stream);
        debug!("🎙️ Microphone session released");
    });

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(CaptureHandle {
            chunks: chunk_rx,
            stop: Some(stop_tx),
        }),
        Ok(Err(msg)) => Err(CoachError::Audio(msg)),
        Err(_) => Err(CoachError::Audio("Capture thread died".to_string())),
    }
}

/// Calculate audio energy for silence gating
pub fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: i64 = samples.iter().map(|&s| (s as i64).pow(2)).sum();
    (sum as f32 / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0i16; 100];
        assert_eq!(calculate_energy(&silence), 0.0);

        let loud = vec![1000i16; 100];
        assert!(calculate_energy(&loud) > 0.0);
    }

    #[test]
    fn test_mic_constraints_serialization() {
        let constraints = MicConstraints::default();
        let json = serde_json::to_value(constraints).unwrap();
        assert_eq!(json["echoCancellation"], true);
        assert_eq!(json["noiseSuppression"], true);
        assert_eq!(json["autoGainControl"], true);
    }
}
