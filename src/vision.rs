//! Vision endpoint client
//!
//! Calls the remote vision+language model for social-cue suggestions.
//! The model itself is opaque; this is a plain JSON-over-HTTP client.

use crate::error::{CoachError, CoachResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Bound on analyze/speak/token calls; failures past it are transient.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

/// One analysis request for the current frame
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub frame: Vec<u8>,
    pub target_vibe: String,
    pub current_topic: String,
    pub language_hint: String,
}

/// Suggestion returned by the vision endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub suggestion: String,
    pub visual_cue: String,
    pub confidence: f32,
}

/// Wire format of the analyze response
#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    suggestion: String,
    #[serde(default)]
    visual_cue_detected: String,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug, Serialize)]
struct AnalyzeBody<'a> {
    frame: String,
    #[serde(rename = "targetVibe")]
    target_vibe: &'a str,
    #[serde(rename = "currentTopic")]
    current_topic: &'a str,
    #[serde(rename = "languageHint")]
    language_hint: &'a str,
}

/// Backend seam for the analysis poller
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn analyze(&self, req: &AnalyzeRequest) -> CoachResult<Suggestion>;
}

/// HTTP client for the analyze endpoint
#[derive(Clone)]
pub struct VisionClient {
    client: reqwest::Client,
    url: String,
}

impl VisionClient {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }

    /// Health check - verify the endpoint is reachable
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!("Vision endpoint not reachable: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl VisionBackend for VisionClient {
    async fn analyze(&self, req: &AnalyzeRequest) -> CoachResult<Suggestion> {
        let body = AnalyzeBody {
            frame: STANDARD.encode(&req.frame),
            target_vibe: &req.target_vibe,
            current_topic: &req.current_topic,
            language_hint: &req.language_hint,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        let body_text = response.text().await?;

        if !status.is_success() {
            warn!("❌ Analyze API error ({}): {}", status, body_text);
            return Err(CoachError::Vision(format!("HTTP {}", status)));
        }

        let parsed: AnalyzeResponse = serde_json::from_str(&body_text)
            .map_err(|e| CoachError::Vision(format!("bad response body: {}", e)))?;

        Ok(Suggestion {
            suggestion: parsed.suggestion,
            visual_cue: parsed.visual_cue_detected,
            confidence: parsed.confidence.clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_response_parsing() {
        let body = r#"{"suggestion":"ask about the dog","visual_cue_detected":"smiling","confidence":0.92}"#;
        let parsed: AnalyzeResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.suggestion, "ask about the dog");
        assert_eq!(parsed.visual_cue_detected, "smiling");
        assert!((parsed.confidence - 0.92).abs() < f32::EPSILON);
    }

    #[test]
    fn test_analyze_response_missing_optional_fields() {
        let body = r#"{"suggestion":"keep listening"}"#;
        let parsed: AnalyzeResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.visual_cue_detected, "");
        assert_eq!(parsed.confidence, 0.0);
    }

    #[test]
    fn test_analyze_body_field_names() {
        let body = AnalyzeBody {
            frame: "aGk=".to_string(),
            target_vibe: "warm",
            current_topic: "travel",
            language_hint: "en-US",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["targetVibe"], "warm");
        assert_eq!(json["currentTopic"], "travel");
        assert_eq!(json["languageHint"], "en-US");
    }
}
