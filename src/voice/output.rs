//! Rodio playback output
//!
//! rodio's `OutputStream` is not Send, so a dedicated thread owns it and
//! the rest of the app only sees the cloneable stream handle. Each speak
//! produces its own `Sink`; stopping the sink releases the playback.

use super::{AudioOutput, PlaybackHandle};
use crate::error::{CoachError, CoachResult};
use std::io::Cursor;
use std::sync::mpsc;
use tracing::{info, warn};

pub struct RodioOutput {
    stream_handle: rodio::OutputStreamHandle,
}

impl RodioOutput {
    /// Spawn the stream-owner thread and return the output, or an error
    /// when no audio device is available.
    pub fn new() -> CoachResult<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();

        std::thread::spawn(move || {
            let (stream, handle) = match rodio::OutputStream::try_default() {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("No audio output: {}", e)));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(handle));

            info!("🔊 Audio output thread started");
            // Keep the stream alive for the process lifetime
            let _stream = stream;
            std::thread::park();
        });

        match ready_rx.recv() {
            Ok(Ok(stream_handle)) => Ok(Self { stream_handle }),
            Ok(Err(msg)) => Err(CoachError::Playback(msg)),
            Err(_) => Err(CoachError::Playback("Audio thread died".to_string())),
        }
    }
}

struct SinkHandle {
    sink: rodio::Sink,
}

impl PlaybackHandle for SinkHandle {
    fn stop(&mut self) {
        self.sink.stop();
    }

    fn is_finished(&self) -> bool {
        self.sink.empty()
    }
}

impl AudioOutput for RodioOutput {
    fn start(&self, audio: Vec<u8>) -> CoachResult<Box<dyn PlaybackHandle>> {
        let sink = rodio::Sink::try_new(&self.stream_handle)
            .map_err(|e| CoachError::Playback(format!("Failed to create sink: {}", e)))?;

        let source = rodio::Decoder::new(Cursor::new(audio)).map_err(|e| {
            warn!("Undecodable TTS audio: {}", e);
            CoachError::Playback(format!("Decode failed: {}", e))
        })?;

        sink.append(source);
        Ok(Box::new(SinkHandle { sink }))
    }
}
