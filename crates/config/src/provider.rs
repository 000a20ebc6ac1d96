//! Provider selection and per-stage tunables.
//!
//! Supplied at session creation and never mutated during a session.

use serde::{Deserialize, Serialize};

use parley_core::{AudioEncoding, SampleRate, VoiceSettings};

use crate::ConfigError;

/// How a stage implementation is sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Deterministic in-process providers, for tests and local runs
    #[default]
    Scripted,
    /// Remote HTTP backend
    Http,
}

/// Speech-to-text provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttProviderConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_stt_model")]
    pub model: String,
    /// BCP-47 tags the session accepts
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    /// Bounded retries for a single failed transcription call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff, doubled each retry
    #[serde(default = "default_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_stt_model() -> String {
    "general-streaming".to_string()
}

fn default_languages() -> Vec<String> {
    vec!["en-US".to_string()]
}

impl Default for SttProviderConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Scripted,
            endpoint: String::new(),
            api_key: None,
            model: default_stt_model(),
            languages: default_languages(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_backoff_ms(),
        }
    }
}

/// Response-generator provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorProviderConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_generator_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Bounded retries for a single failed call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff, doubled each retry
    #[serde(default = "default_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_generator_model() -> String {
    "chat-small".to_string()
}

fn default_max_tokens() -> usize {
    256
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    100
}

impl Default for GeneratorProviderConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Scripted,
            endpoint: String::new(),
            api_key: None,
            model: default_generator_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_backoff_ms(),
        }
    }
}

/// Text-to-speech provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsProviderConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate_hz: u32,
    #[serde(default)]
    pub encoding: AudioEncoding,
}

fn default_voice() -> String {
    "hd-orus".to_string()
}

fn default_tts_sample_rate() -> u32 {
    44_100
}

impl Default for TtsProviderConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Scripted,
            endpoint: String::new(),
            api_key: None,
            voice: default_voice(),
            sample_rate_hz: default_tts_sample_rate(),
            encoding: AudioEncoding::Linear16,
        }
    }
}

impl TtsProviderConfig {
    pub fn voice_settings(&self) -> Result<VoiceSettings, ConfigError> {
        let sample_rate =
            SampleRate::from_hz(self.sample_rate_hz).ok_or_else(|| ConfigError::InvalidValue {
                field: "tts.sample_rate_hz".to_string(),
                message: format!("unsupported sample rate {}", self.sample_rate_hz),
            })?;
        Ok(VoiceSettings {
            voice: self.voice.clone(),
            sample_rate,
            encoding: self.encoding,
        })
    }
}

/// Voice-activity detection tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Energy above this dBFS level counts as speech
    #[serde(default = "default_threshold_db")]
    pub threshold_db: f32,
    /// Speech must persist this long before a start event fires
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u64,
    /// Silence must persist this long before an end event fires
    #[serde(default = "default_min_silence_ms")]
    pub min_silence_ms: u64,
    /// Rolling score-smoothing window, in frames
    #[serde(default = "default_window_frames")]
    pub window_frames: usize,
}

fn default_threshold_db() -> f32 {
    -40.0
}

fn default_min_speech_ms() -> u64 {
    100
}

fn default_min_silence_ms() -> u64 {
    200
}

fn default_window_frames() -> usize {
    5
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold_db: default_threshold_db(),
            min_speech_ms: default_min_speech_ms(),
            min_silence_ms: default_min_silence_ms(),
            window_frames: default_window_frames(),
        }
    }
}

/// Turn-detection tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Base silence threshold after which the floor is yielded
    #[serde(default = "default_yield_silence_ms")]
    pub yield_silence_ms: u64,
}

fn default_yield_silence_ms() -> u64 {
    550
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            yield_silence_ms: default_yield_silence_ms(),
        }
    }
}

/// Static configuration selecting provider identity and tunables for one
/// session. The persona is an opaque text blob handed to the generator.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    /// Fixed system context for the response generator; never parsed
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub stt: SttProviderConfig,
    #[serde(default)]
    pub generator: GeneratorProviderConfig,
    #[serde(default)]
    pub tts: TtsProviderConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    /// Apply noise suppression to inbound frames before VAD/STT
    #[serde(default)]
    pub noise_suppression: bool,
    /// Spoken when a stage exhausts its retries
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

fn default_fallback_reply() -> String {
    "Sorry, I ran into a problem on my end. Could you say that again?".to_string()
}

impl ProviderConfig {
    /// Presence-only validation, per the external-interface contract.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persona.trim().is_empty() {
            return Err(ConfigError::MissingField("persona".to_string()));
        }
        if self.stt.languages.is_empty() {
            return Err(ConfigError::MissingField("stt.languages".to_string()));
        }
        Self::require_endpoint("stt", self.stt.provider, &self.stt.endpoint)?;
        Self::require_endpoint("generator", self.generator.provider, &self.generator.endpoint)?;
        Self::require_endpoint("tts", self.tts.provider, &self.tts.endpoint)?;
        self.tts.voice_settings()?;
        Ok(())
    }

    fn require_endpoint(
        section: &str,
        provider: ProviderKind,
        endpoint: &str,
    ) -> Result<(), ConfigError> {
        if provider == ProviderKind::Http && endpoint.trim().is_empty() {
            return Err(ConfigError::MissingField(format!("{section}.endpoint")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ProviderConfig {
        ProviderConfig {
            persona: "You are a helpful front-desk assistant.".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_requires_persona() {
        let config = ProviderConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(field)) if field == "persona"
        ));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_http_provider_requires_endpoint() {
        let mut config = valid_config();
        config.generator.provider = ProviderKind::Http;
        assert!(config.validate().is_err());

        config.generator.endpoint = "http://localhost:11434".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_voice_settings_mapping() {
        let tts = TtsProviderConfig::default();
        let voice = tts.voice_settings().unwrap();
        assert_eq!(voice.sample_rate.as_hz(), 44_100);

        let bad = TtsProviderConfig {
            sample_rate_hz: 11_025,
            ..Default::default()
        };
        assert!(bad.voice_settings().is_err());
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let raw = r#"
            persona = "Front desk."

            [generator]
            provider = "http"
            endpoint = "http://localhost:11434"
            model = "chat-large"
        "#;
        let config: ProviderConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.generator.model, "chat-large");
        assert_eq!(config.generator.max_retries, 3);
        assert_eq!(config.turn.yield_silence_ms, 550);
        assert!(config.validate().is_ok());
    }
}
