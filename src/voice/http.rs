//! HTTP speech synthesis backend
//!
//! POSTs text to the speak endpoint and returns raw audio bytes.
//! HTTP 204 or an empty body means "nothing to say".

use super::SpeechBackend;
use crate::error::{CoachError, CoachResult};
use crate::vision::REQUEST_TIMEOUT;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

pub struct HttpSpeechBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpSpeechBackend {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl SpeechBackend for HttpSpeechBackend {
    async fn synthesize(&self, text: &str) -> CoachResult<Vec<u8>> {
        debug!("📢 Requesting speech for: '{}'", text);

        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "text": text }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(CoachError::Tts(format!("HTTP {}", status)));
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}
