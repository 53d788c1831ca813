//! Cloud speech provider (primary)
//!
//! Protocol: fetch a short-lived session token from the backend, then open
//! a TCP session to the provider where events are JSON lines. We send one
//! `session-start` line carrying the token, language tag, and microphone
//! constraints, then stream base64 `audio-chunk` lines; the provider
//! replies with `partial`, `transcript`, and `error` lines.

use super::{ProviderConnection, ProviderEvent, SpeechEvent, SpeechProvider};
use crate::audio::{self, MicConstraints};
use crate::error::{CoachError, CoachResult};
use crate::vision::REQUEST_TIMEOUT;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const SAMPLE_RATE: u32 = 16000;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Fetch a short-lived provider session token from the backend
pub async fn fetch_session_token(client: &reqwest::Client, url: &str) -> CoachResult<String> {
    let response = client.get(url).timeout(REQUEST_TIMEOUT).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(CoachError::Token(format!("HTTP {}", status)));
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| CoachError::Token(format!("bad token body: {}", e)))?;

    if parsed.token.is_empty() {
        return Err(CoachError::Token("empty token".to_string()));
    }
    Ok(parsed.token)
}

pub struct CloudProvider {
    client: reqwest::Client,
    token_url: String,
    host: String,
    port: u16,
    constraints: MicConstraints,
    device_index: Option<usize>,
}

impl CloudProvider {
    pub fn new(
        token_url: &str,
        host: &str,
        port: u16,
        constraints: MicConstraints,
        device_index: Option<usize>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: token_url.to_string(),
            host: host.to_string(),
            port,
            constraints,
            device_index,
        }
    }
}

#[async_trait]
impl SpeechProvider for CloudProvider {
    async fn open(
        &mut self,
        language: &str,
        events: mpsc::Sender<ProviderEvent>,
        generation: u64,
    ) -> CoachResult<Box<dyn ProviderConnection>> {
        let token = fetch_session_token(&self.client, &self.token_url).await?;

        let stream = TcpStream::connect((&*self.host, self.port))
            .await
            .map_err(|e| CoachError::Speech(format!("connect failed: {}", e)))?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        // Session handshake
        let session_start = serde_json::json!({
            "type": "session-start",
            "data": {
                "token": token,
                "language": language,
                "constraints": self.constraints,
                "rate": SAMPLE_RATE,
                "width": 2,
                "channels": 1
            }
        });
        writer
            .write_all(session_start.to_string().as_bytes())
            .await
            .map_err(|e| CoachError::Speech(format!("handshake failed: {}", e)))?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        // One microphone session per connection; dropping the handle (when
        // the writer task ends) releases the device
        let mut capture = audio::start_capture(self.device_index)?;

        let writer_task = tokio::spawn(async move {
            while let Some(chunk) = capture.next_chunk().await {
                let bytes: Vec<u8> = chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
                let line = serde_json::json!({
                    "type": "audio-chunk",
                    "data": {
                        "rate": SAMPLE_RATE,
                        "width": 2,
                        "channels": 1,
                        "audio": STANDARD.encode(&bytes)
                    }
                });
                if writer.write_all(line.to_string().as_bytes()).await.is_err() {
                    break;
                }
                if writer.write_all(b"\n").await.is_err() {
                    break;
                }
            }
            debug!("Cloud audio writer stopped");
        });

        let reader_task = tokio::spawn(async move {
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        let _ = events
                            .send(ProviderEvent {
                                generation,
                                event: SpeechEvent::Ended,
                            })
                            .await;
                        break;
                    }
                    Ok(_) => {
                        if let Some(event) = parse_provider_line(&line) {
                            let fatal = matches!(event, SpeechEvent::Error(_));
                            let _ = events.send(ProviderEvent { generation, event }).await;
                            if fatal {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = events
                            .send(ProviderEvent {
                                generation,
                                event: SpeechEvent::Error(format!("read failed: {}", e)),
                            })
                            .await;
                        break;
                    }
                }
            }
            debug!("Cloud event reader stopped");
        });

        Ok(Box::new(CloudConnection {
            writer_task,
            reader_task,
        }))
    }
}

/// Map one provider JSON line to a speech event
fn parse_provider_line(line: &str) -> Option<SpeechEvent> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let text = |v: &serde_json::Value| {
        v.get("data")
            .and_then(|d| d.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string()
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("partial") => Some(SpeechEvent::Partial(text(&value))),
        Some("transcript") => Some(SpeechEvent::Committed(text(&value))),
        Some("error") => {
            let message = value
                .get("data")
                .and_then(|d| d.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("provider error")
                .to_string();
            Some(SpeechEvent::Error(message))
        }
        other => {
            debug!("Unknown cloud event type: {:?}", other);
            None
        }
    }
}

struct CloudConnection {
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
}

#[async_trait]
impl ProviderConnection for CloudConnection {
    async fn close(&mut self) {
        // Best-effort: stop both tasks and let the socket drop
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

impl Drop for CloudConnection {
    fn drop(&mut self) {
        self.writer_task.abort();
        self.reader_task.abort();
    }
}
