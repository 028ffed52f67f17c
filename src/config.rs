//! Session configuration
//!
//! A [`LiveConfig`] is supplied once when a client is built and never
//! mutated afterwards.

use crate::error::{LiveError, Result};
use crate::protocol::FunctionDeclaration;
use std::time::Duration;

/// Bidirectional streaming endpoint of the Live API.
pub const LIVE_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-live-preview";

/// Response modality options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Text,
    Audio,
}

impl ResponseModality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Audio => "AUDIO",
        }
    }
}

/// Which calls of a multi-call tool request get an automatic response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionResponseMode {
    /// Answer only the first call of each tool-call message.
    #[default]
    FirstOnly,
    /// Answer every call, in arrival order, in a single response message.
    All,
}

/// Configuration for a live session
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub url: String,
    pub model: String,
    pub system_instruction: String,
    pub response_modality: ResponseModality,
    pub function_declarations: Vec<FunctionDeclaration>,
    pub function_response_mode: FunctionResponseMode,
    pub google_search: bool,
    pub code_execution: bool,
    pub url_context: bool,
    pub input_audio_transcription: bool,
    pub output_audio_transcription: bool,
    /// Longest side of a screen image before it is downscaled.
    pub max_image_dimension: u32,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
    pub image_send_interval: Duration,
    /// Silence the server waits for before closing a user speech turn.
    pub activity_detection_silence_ms: u32,
    pub activity_detection_prefix_padding_ms: u32,
    pub activity_detection_disabled: bool,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            url: LIVE_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_instruction: "You are a helpful AI assistant".to_string(),
            response_modality: ResponseModality::Audio,
            function_declarations: Vec::new(),
            function_response_mode: FunctionResponseMode::FirstOnly,
            google_search: false,
            code_execution: false,
            url_context: false,
            input_audio_transcription: false,
            output_audio_transcription: false,
            max_image_dimension: 1920,
            jpeg_quality: 75,
            image_send_interval: Duration::from_millis(5000),
            activity_detection_silence_ms: 1500,
            activity_detection_prefix_padding_ms: 20,
            activity_detection_disabled: false,
        }
    }
}

impl LiveConfig {
    /// Default configuration pointed at the public endpoint with the given API key.
    pub fn from_api_key(api_key: &str) -> Self {
        Self {
            url: format!("{}?key={}", LIVE_ENDPOINT, api_key),
            ..Default::default()
        }
    }

    /// Read `GEMINI_API_KEY` and the optional `GEMINI_LIVE_MODEL` from the environment.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|e| LiveError::Config(format!("GEMINI_API_KEY: {}", e)))?;
        let mut config = Self::from_api_key(&api_key);
        if let Ok(model) = std::env::var("GEMINI_LIVE_MODEL") {
            config.model = if model.starts_with("models/") {
                model
            } else {
                format!("models/{}", model)
            };
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(LiveError::Config("endpoint url is empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(LiveError::Config("model is empty".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(LiveError::Config(format!(
                "jpeg quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.max_image_dimension == 0 {
            return Err(LiveError::Config("max image dimension must be positive".into()));
        }
        if self.image_send_interval.is_zero() {
            return Err(LiveError::Config("image send interval must be positive".into()));
        }
        Ok(())
    }

    /// Endpoint with any `key=` query value masked, for logs.
    pub fn redacted_url(&self) -> String {
        match self.url.split_once("key=") {
            Some((head, _)) => format!("{}key=***", head),
            None => self.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LiveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.jpeg_quality, 75);
        assert_eq!(config.image_send_interval, Duration::from_secs(5));
        assert_eq!(config.response_modality.as_str(), "AUDIO");
        assert_eq!(config.function_response_mode, FunctionResponseMode::FirstOnly);
    }

    #[test]
    fn test_from_api_key_builds_url() {
        let config = LiveConfig::from_api_key("secret");
        assert!(config.url.starts_with("wss://generativelanguage.googleapis.com/ws/"));
        assert!(config.url.ends_with("?key=secret"));
        assert!(!config.redacted_url().contains("secret"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_quality = LiveConfig { jpeg_quality: 0, ..Default::default() };
        assert!(matches!(bad_quality.validate(), Err(LiveError::Config(_))));

        let bad_interval = LiveConfig {
            image_send_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(bad_interval.validate().is_err());

        let bad_model = LiveConfig { model: " ".into(), ..Default::default() };
        assert!(bad_model.validate().is_err());
    }

    #[test]
    fn test_enum_as_str() {
        assert_eq!(ResponseModality::Text.as_str(), "TEXT");
        assert_eq!(ResponseModality::Audio.as_str(), "AUDIO");
    }
}
