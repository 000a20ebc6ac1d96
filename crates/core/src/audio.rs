//! Audio frame types shared by every pipeline stage.

use serde::{Deserialize, Serialize};

/// Supported sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SampleRate {
    Hz8000,
    #[default]
    Hz16000,
    Hz24000,
    Hz44100,
    Hz48000,
}

impl SampleRate {
    pub fn as_hz(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8_000,
            SampleRate::Hz16000 => 16_000,
            SampleRate::Hz24000 => 24_000,
            SampleRate::Hz44100 => 44_100,
            SampleRate::Hz48000 => 48_000,
        }
    }

    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            8_000 => Some(SampleRate::Hz8000),
            16_000 => Some(SampleRate::Hz16000),
            24_000 => Some(SampleRate::Hz24000),
            44_100 => Some(SampleRate::Hz44100),
            48_000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }
}

/// Channel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Channels {
    #[default]
    Mono,
    Stereo,
}

impl Channels {
    pub fn count(&self) -> u16 {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

/// Wire encoding for synthesized audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 16-bit signed little-endian PCM
    #[default]
    Linear16,
    /// 32-bit float PCM
    Float32,
}

/// A timestamped chunk of raw audio samples.
///
/// Frames are immutable once produced; ownership passes from the producing
/// stage to the consuming stage (single reader).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Samples in [-1.0, 1.0], interleaved if stereo
    pub samples: Vec<f32>,
    pub sample_rate: SampleRate,
    pub channels: Channels,
    /// Capture timestamp relative to session start
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn new(
        samples: Vec<f32>,
        sample_rate: SampleRate,
        channels: Channels,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            timestamp_ms,
        }
    }

    /// A silent frame of the given duration.
    pub fn silence(duration_ms: u64, sample_rate: SampleRate, timestamp_ms: u64) -> Self {
        let n = (sample_rate.as_hz() as u64 * duration_ms / 1000) as usize;
        Self::new(vec![0.0; n], sample_rate, Channels::Mono, timestamp_ms)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration derived from sample count and rate.
    pub fn duration_ms(&self) -> u64 {
        let per_channel = self.samples.len() as u64 / self.channels.count() as u64;
        per_channel * 1000 / self.sample_rate.as_hz() as u64
    }

    /// Root-mean-square amplitude of the frame.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f64 = self.samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum_squares / self.samples.len() as f64).sqrt() as f32
    }

    /// Frame energy in dBFS, floored at -100 dB for silence.
    pub fn dbfs(&self) -> f32 {
        let rms = self.rms();
        if rms <= 1e-10 {
            return -100.0;
        }
        20.0 * rms.log10()
    }
}

/// Voice identity and output audio format, fixed for a session's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Provider-specific voice name
    pub voice: String,
    pub sample_rate: SampleRate,
    pub encoding: AudioEncoding,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice: "default".to_string(),
            sample_rate: SampleRate::Hz44100,
            encoding: AudioEncoding::Linear16,
        }
    }
}
