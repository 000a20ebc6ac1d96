//! HTTP speech providers.
//!
//! Thin JSON-over-HTTP clients for remote STT and TTS services. Audio
//! crosses the wire base64-encoded in the session's configured encoding.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use parley_config::{SttProviderConfig, TtsProviderConfig};
use parley_core::{
    AudioEncoding, AudioFrame, Channels, Error, Result, SampleRate, Speaker, SpeechRecognizer,
    SpeechSynthesizer, StageKind, Utterance, VoiceSettings,
};

use crate::ProviderError;

fn build_client(timeout: Duration) -> std::result::Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Configuration(format!("failed to create HTTP client: {e}")))
}

fn encode_samples(samples: &[f32], encoding: AudioEncoding) -> String {
    let bytes = match encoding {
        AudioEncoding::Linear16 => samples
            .iter()
            .flat_map(|s| {
                let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                v.to_le_bytes()
            })
            .collect::<Vec<u8>>(),
        AudioEncoding::Float32 => samples
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect::<Vec<u8>>(),
    };
    BASE64.encode(bytes)
}

/// Bounded retry with exponential backoff for one provider call.
async fn call_with_retries<T, F, Fut>(
    max_retries: u32,
    initial_backoff: Duration,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(error = %err, attempt, "provider call failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

fn decode_samples(data: &str, encoding: AudioEncoding) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| Error::stage_fatal(StageKind::Synthesizer, format!("bad audio payload: {e}")))?;
    let samples = match encoding {
        AudioEncoding::Linear16 => bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
            .collect(),
        AudioEncoding::Float32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    };
    Ok(samples)
}

/// Remote speech-to-text over a JSON transcription endpoint.
///
/// Buffers the turn's audio and transcribes it in one call when the
/// input closes. No partials are produced; the turn detector falls back
/// to its base silence threshold.
pub struct HttpRecognizer {
    client: Client,
    config: SttProviderConfig,
}

impl HttpRecognizer {
    pub fn new(config: &SttProviderConfig) -> std::result::Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(Duration::from_secs(30))?,
            config: config.clone(),
        })
    }

    /// Transcribe one buffered turn, retrying transient failures. The
    /// samples stay in hand, so a retry re-sends the same audio.
    async fn transcribe(&self, samples: &[f32], sample_rate: SampleRate) -> Result<String> {
        call_with_retries(
            self.config.max_retries,
            Duration::from_millis(self.config.initial_backoff_ms),
            || self.transcribe_once(samples, sample_rate),
        )
        .await
    }

    async fn transcribe_once(&self, samples: &[f32], sample_rate: SampleRate) -> Result<String> {
        let body = TranscribeRequest {
            model: self.config.model.clone(),
            languages: self.config.languages.clone(),
            sample_rate_hz: sample_rate.as_hz(),
            audio: encode_samples(samples, AudioEncoding::Linear16),
        };
        let mut builder = self
            .client
            .post(format!("{}/transcribe", self.config.endpoint.trim_end_matches('/')))
            .json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::stage(StageKind::Recognizer, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            let err = if status.is_server_error() {
                Error::stage(StageKind::Recognizer, format!("server error {status}: {detail}"))
            } else {
                Error::stage_fatal(StageKind::Recognizer, format!("rejected {status}: {detail}"))
            };
            return Err(err);
        }

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| Error::stage_fatal(StageKind::Recognizer, e.to_string()))?;
        Ok(parsed.text)
    }
}

impl SpeechRecognizer for HttpRecognizer {
    fn transcribe_stream<'a>(
        &'a self,
        audio: Pin<Box<dyn Stream<Item = AudioFrame> + Send + 'a>>,
    ) -> Pin<Box<dyn Stream<Item = Result<Utterance>> + Send + 'a>> {
        Box::pin(async_stream::try_stream! {
            let mut audio = audio;
            let mut samples: Vec<f32> = Vec::new();
            let mut sample_rate = SampleRate::Hz16000;
            let mut started_at = None;
            let mut ended_at = 0;

            while let Some(frame) = audio.next().await {
                if started_at.is_none() {
                    started_at = Some(frame.timestamp_ms);
                    sample_rate = frame.sample_rate;
                }
                ended_at = frame.timestamp_ms + frame.duration_ms();
                samples.extend_from_slice(&frame.samples);
            }

            // Input closed with no speech: end without an utterance.
            if let Some(started_at) = started_at {
                let text = self.transcribe(&samples, sample_rate).await?;
                if !text.trim().is_empty() {
                    yield Utterance::final_(Speaker::Participant, text, started_at, ended_at);
                }
            }
        })
    }

    fn supported_languages(&self) -> &[String] {
        &self.config.languages
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Remote text-to-speech over a JSON synthesis endpoint.
pub struct HttpSynthesizer {
    client: Client,
    config: TtsProviderConfig,
}

impl HttpSynthesizer {
    pub fn new(config: &TtsProviderConfig) -> std::result::Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(Duration::from_secs(30))?,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<AudioFrame> {
        let body = SynthesizeRequest {
            text: text.to_string(),
            voice: voice.voice.clone(),
            sample_rate_hz: voice.sample_rate.as_hz(),
            encoding: voice.encoding,
        };
        let mut builder = self
            .client
            .post(format!("{}/synthesize", self.config.endpoint.trim_end_matches('/')))
            .json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::stage(StageKind::Synthesizer, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(Error::stage(
                    StageKind::Synthesizer,
                    format!("server error {status}: {detail}"),
                ));
            }
            return Err(Error::stage_fatal(
                StageKind::Synthesizer,
                format!("rejected {status}: {detail}"),
            ));
        }

        let parsed: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| Error::stage_fatal(StageKind::Synthesizer, e.to_string()))?;
        let samples = decode_samples(&parsed.audio, voice.encoding)?;
        Ok(AudioFrame::new(samples, voice.sample_rate, Channels::Mono, 0))
    }

    fn model_name(&self) -> &str {
        &self.config.voice
    }
}

#[derive(Debug, Serialize)]
struct TranscribeRequest {
    model: String,
    languages: Vec<String>,
    sample_rate_hz: u32,
    audio: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest {
    text: String,
    voice: String,
    sample_rate_hz: u32,
    encoding: AudioEncoding,
}

#[derive(Debug, Deserialize)]
struct SynthesizeResponse {
    audio: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear16_codec_round_trip() {
        let samples = vec![0.0, 0.5, -0.5, 1.0];
        let encoded = encode_samples(&samples, AudioEncoding::Linear16);
        let decoded = decode_samples(&encoded, AudioEncoding::Linear16).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_float32_codec_exact() {
        let samples = vec![0.123_f32, -0.987, 0.0];
        let encoded = encode_samples(&samples, AudioEncoding::Float32);
        let decoded = decode_samples(&encoded, AudioEncoding::Float32).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_samples("not base64!!!", AudioEncoding::Linear16).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_recover_transient_failures() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let attempts = AtomicU32::new(0);
        let result = call_with_retries(2, Duration::from_millis(50), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::stage(StageKind::Recognizer, "transient"))
                } else {
                    Ok("hello".to_string())
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "hello");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_fail_fast_on_fatal_errors() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let attempts = AtomicU32::new(0);
        let result: Result<()> = call_with_retries(5, Duration::from_millis(10), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::stage_fatal(StageKind::Recognizer, "bad audio")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
