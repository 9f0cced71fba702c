//! Application settings, loaded once at startup from a JSON file.
//!
//! All sections have working defaults pointing at local backends, so the
//! application runs without a settings file at all.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{AituberError, Result};

/// Dialogue backend (Ollama-style chat endpoint)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueSettings {
    pub endpoint: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_reply_tokens: u32,
    /// Upper bound on remembered conversation turns
    pub max_turns: usize,
    /// Upper bound on estimated context tokens
    pub max_context_tokens: usize,
    pub request_timeout_secs: u64,
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            system_prompt: "You are a cheerful virtual streamer. Keep replies short, \
                            conversational and suitable for being spoken aloud."
                .to_string(),
            temperature: 0.7,
            max_reply_tokens: 512,
            max_turns: 12,
            max_context_tokens: 4096,
            request_timeout_secs: 30,
        }
    }
}

/// Speech synthesis backend (GPT-SoVITS-style HTTP server)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    pub server_url: String,
    pub ref_audio_path: String,
    pub prompt_text: String,
    pub prompt_lang: String,
    pub text_lang: String,
    /// Maximum characters per synthesis chunk
    pub chunk_max_chars: usize,
    /// Spacing of lip-sync envelope points, in milliseconds
    pub envelope_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:9880/tts".to_string(),
            ref_audio_path: "ref/reference.wav".to_string(),
            prompt_text: String::new(),
            prompt_lang: "en".to_string(),
            text_lang: "en".to_string(),
            chunk_max_chars: 40,
            envelope_interval_ms: 50,
            request_timeout_secs: 30,
        }
    }
}

/// VTube Studio connection and rig parameter ids
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VtsSettings {
    pub host: String,
    pub port: u16,
    pub plugin_name: String,
    pub plugin_developer: String,
    pub mouth_param: String,
    pub eye_left_param: String,
    pub eye_right_param: String,
    /// Minimum seconds between reconnect attempts
    pub reconnect_interval_secs: f64,
}

impl Default for VtsSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
            plugin_name: "Aituber".to_string(),
            plugin_developer: "Aituber Contributors".to_string(),
            mouth_param: "MouthOpen".to_string(),
            eye_left_param: "EyeOpenLeft".to_string(),
            eye_right_param: "EyeOpenRight".to_string(),
            reconnect_interval_secs: 5.0,
        }
    }
}

/// Idle animation behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationSettings {
    pub blink_min_interval_secs: f64,
    pub blink_max_interval_secs: f64,
    pub suppress_blink_while_speaking: bool,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            blink_min_interval_secs: 3.0,
            blink_max_interval_secs: 6.0,
            suppress_blink_while_speaking: false,
        }
    }
}

/// Microphone speech-to-text
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SttSettings {
    pub model_path: String,
    pub language: String,
    pub vad_threshold: f32,
    /// Trailing silence that finalizes a segment, in milliseconds
    pub silence_duration_ms: u64,
    pub min_speech_duration_ms: u64,
    pub max_segment_duration_secs: f32,
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            model_path: "models/ggml-base.en.bin".to_string(),
            language: "en".to_string(),
            vad_threshold: 0.5,
            silence_duration_ms: 800,
            min_speech_duration_ms: 300,
            max_segment_duration_secs: 30.0,
        }
    }
}

/// Turn pipeline policy flags
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Record the assistant reply in context even when synthesis fails
    pub record_unspoken_reply: bool,
    /// When true, every finalized transcript starts a turn
    pub treat_all_as_directed: bool,
    /// Keywords that mark an utterance as directed at the character
    pub directed_keywords: Vec<String>,
    /// Questions at most this many characters count as directed
    pub max_question_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            record_unspoken_reply: true,
            treat_all_as_directed: true,
            directed_keywords: Vec::new(),
            max_question_chars: 15,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dialogue: DialogueSettings,
    pub synthesis: SynthesisSettings,
    pub vts: VtsSettings,
    pub animation: AnimationSettings,
    pub stt: SttSettings,
    pub pipeline: PipelineSettings,
}

impl Settings {
    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&raw)
            .map_err(|e| AituberError::ConfigError(format!("{}: {}", path.display(), e)))?;
        settings.validate()?;

        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load from a file if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.dialogue.model = model.into();
        self
    }

    pub fn with_ref_audio(mut self, path: impl Into<String>) -> Self {
        self.synthesis.ref_audio_path = path.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dialogue.endpoint.is_empty() {
            return Err(AituberError::ConfigError(
                "dialogue.endpoint must not be empty".into(),
            ));
        }
        if self.dialogue.max_turns == 0 {
            return Err(AituberError::ConfigError(
                "dialogue.max_turns must be at least 1".into(),
            ));
        }
        if self.synthesis.chunk_max_chars == 0 {
            return Err(AituberError::ConfigError(
                "synthesis.chunk_max_chars must be at least 1".into(),
            ));
        }
        if self.synthesis.envelope_interval_ms == 0 {
            return Err(AituberError::ConfigError(
                "synthesis.envelope_interval_ms must be at least 1".into(),
            ));
        }
        if self.animation.blink_min_interval_secs <= 0.0
            || self.animation.blink_max_interval_secs < self.animation.blink_min_interval_secs
        {
            return Err(AituberError::ConfigError(
                "animation blink interval bounds must be positive and ordered".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let json = r#"{ "dialogue": { "model": "qwen2.5:7b" } }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.dialogue.model, "qwen2.5:7b");
        assert_eq!(settings.vts.port, 8001);
        assert!(settings.pipeline.record_unspoken_reply);
    }

    #[test]
    fn test_invalid_blink_bounds() {
        let mut settings = Settings::default();
        settings.animation.blink_max_interval_secs = 1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let settings = Settings::default()
            .with_model("mistral")
            .with_ref_audio("voice.wav");
        assert_eq!(settings.dialogue.model, "mistral");
        assert_eq!(settings.synthesis.ref_audio_path, "voice.wav");
    }
}
