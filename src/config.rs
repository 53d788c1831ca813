use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Collaborator endpoints
    pub analyze_url: String,
    pub speak_url: String,
    pub token_url: String,

    // Cloud speech provider session
    pub cloud_speech_host: String,
    pub cloud_speech_port: u16,

    // Local fallback recognition
    pub vosk_model_path: String,
    /// Per-language model overrides for the fallback recognizer.
    /// Vosk models are monolingual; a language change picks from here.
    #[serde(default)]
    pub vosk_model_paths: HashMap<String, String>,

    // Session defaults
    pub language: String,
    pub target_vibe: String,
    pub frame_type: String,
    pub auto_voice_enabled: bool,

    // Poller
    pub poll_interval_ms: u64,
    pub speak_confidence: f32,

    // Frame source
    pub frame_dir: String,

    // Meta
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analyze_url: "http://localhost:8080/api/analyze".to_string(),
            speak_url: "http://localhost:8080/api/speak".to_string(),
            token_url: "http://localhost:8080/api/session-token".to_string(),
            cloud_speech_host: "localhost".to_string(),
            cloud_speech_port: 10510,
            vosk_model_path: dirs::data_dir()
                .unwrap_or_default()
                .join("vibecoach/models/vosk-model-small-en-us")
                .to_string_lossy()
                .to_string(),
            vosk_model_paths: HashMap::new(),
            language: "en-US".to_string(),
            target_vibe: "warm and curious".to_string(),
            frame_type: "ambient".to_string(),
            auto_voice_enabled: true,
            poll_interval_ms: 7000,
            speak_confidence: 0.8,
            frame_dir: dirs::data_dir()
                .unwrap_or_default()
                .join("vibecoach/frames")
                .to_string_lossy()
                .to_string(),
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Load config from file or create default
    pub fn load() -> Result<Self> {
        let config_path = config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            match serde_json::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    // Graceful degradation: log warning and use defaults
                    tracing::warn!("⚠️ Config file corrupted or invalid, using defaults: {}", e);
                    // Backup corrupt file for debugging
                    let backup_path = config_path.with_extension("json.corrupt");
                    let _ = std::fs::rename(&config_path, &backup_path);
                    Ok(Self::default())
                }
            }
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Fallback model path for a language tag, if one is configured
    pub fn fallback_model_for(&self, language: &str) -> &str {
        self.vosk_model_paths
            .get(language)
            .map(String::as_str)
            .unwrap_or(&self.vosk_model_path)
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vibecoach")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval_ms, 7000);
        assert_eq!(config.speak_confidence, 0.8);
        assert_eq!(config.language, "en-US");
        assert!(config.auto_voice_enabled);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).expect("Failed to serialize");
        let restored: Config = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(config.analyze_url, restored.analyze_url);
        assert_eq!(config.target_vibe, restored.target_vibe);
    }

    #[test]
    fn test_fallback_model_lookup() {
        let mut config = Config::default();
        config
            .vosk_model_paths
            .insert("de-DE".to_string(), "/models/de".to_string());
        assert_eq!(config.fallback_model_for("de-DE"), "/models/de");
        assert_eq!(config.fallback_model_for("fr-FR"), config.vosk_model_path);
    }

    #[test]
    fn test_config_corrupt_json_handling() {
        // Config::load uses graceful degradation - this tests the parsing path
        let corrupt_json = "{ not valid json";
        let result: Result<Config, _> = serde_json::from_str(corrupt_json);
        assert!(result.is_err());
    }
}
