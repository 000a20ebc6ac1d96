//! Energy-based voice activity detection.
//!
//! The model is loaded once per process at prewarm time and shared
//! read-only across sessions. Per-session smoothing state lives in
//! `VadSession`, which keeps a fixed-size rolling window so arbitrarily
//! long silence costs constant memory.

use std::collections::VecDeque;
use std::sync::Arc;

use parley_config::VadConfig;
use parley_core::{AudioFrame, VadEvent, VadModel};

use crate::PipelineError;

/// Energy-threshold VAD model. Stateless and cheap to score, so a single
/// instance serves every session in the process.
#[derive(Debug)]
pub struct EnergyVadModel {
    threshold_db: f32,
}

impl EnergyVadModel {
    /// Validate config and "load" the model. Failures here are surfaced at
    /// prewarm time so a broken model never takes down a live session.
    pub fn load(config: &VadConfig) -> Result<Self, PipelineError> {
        if !config.threshold_db.is_finite() || config.threshold_db >= 0.0 {
            return Err(PipelineError::Model(format!(
                "vad threshold must be a negative dBFS value, got {}",
                config.threshold_db
            )));
        }
        if config.window_frames == 0 {
            return Err(PipelineError::Model(
                "vad window_frames must be at least 1".to_string(),
            ));
        }
        tracing::info!(threshold_db = config.threshold_db, "VAD model loaded");
        Ok(Self {
            threshold_db: config.threshold_db,
        })
    }
}

impl VadModel for EnergyVadModel {
    /// Map frame energy to a speech score: 0 at or below the threshold,
    /// saturating to 1 at 20 dB above it.
    fn score(&self, frame: &AudioFrame) -> f32 {
        ((frame.dbfs() - self.threshold_db) / 20.0).clamp(0.0, 1.0)
    }

    fn model_name(&self) -> &str {
        "energy-vad"
    }
}

/// Load the shared VAD model. Idempotence is the caller's concern (the
/// lifecycle manager caches the result in a once-cell).
pub fn prewarm_vad(config: &VadConfig) -> Result<Arc<EnergyVadModel>, PipelineError> {
    Ok(Arc::new(EnergyVadModel::load(config)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VadState {
    Silence,
    Speech,
}

/// Per-session speech boundary detector over a shared model.
pub struct VadSession {
    model: Arc<dyn VadModel>,
    config: VadConfig,
    /// Rolling score window; capacity is fixed at `config.window_frames`
    window: VecDeque<f32>,
    state: VadState,
    /// Milliseconds of consecutive speech-scored audio
    speech_run_ms: u64,
    /// Milliseconds of consecutive silence-scored audio
    silence_run_ms: u64,
    /// Timestamp of the first frame in the current speech run
    speech_started_ms: u64,
    /// Timestamp when the last confirmed speech segment ended
    last_speech_end_ms: Option<u64>,
}

impl VadSession {
    pub fn new(model: Arc<dyn VadModel>, config: VadConfig) -> Self {
        let window = VecDeque::with_capacity(config.window_frames);
        Self {
            model,
            config,
            window,
            state: VadState::Silence,
            speech_run_ms: 0,
            silence_run_ms: 0,
            speech_started_ms: 0,
            last_speech_end_ms: None,
        }
    }

    /// Feed one frame; returns a boundary event when one is confirmed.
    pub fn process(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        let score = self.model.score(frame);
        if self.window.len() == self.config.window_frames {
            self.window.pop_front();
        }
        self.window.push_back(score);
        let smoothed = self.window.iter().sum::<f32>() / self.window.len() as f32;

        let frame_ms = frame.duration_ms().max(1);
        let is_speech = smoothed >= 0.5;

        match self.state {
            VadState::Silence => {
                if is_speech {
                    if self.speech_run_ms == 0 {
                        self.speech_started_ms = frame.timestamp_ms;
                    }
                    self.speech_run_ms += frame_ms;
                    if self.speech_run_ms >= self.config.min_speech_ms {
                        self.state = VadState::Speech;
                        self.silence_run_ms = 0;
                        return Some(VadEvent::SpeechStart {
                            timestamp_ms: self.speech_started_ms,
                        });
                    }
                } else {
                    self.speech_run_ms = 0;
                    self.silence_run_ms += frame_ms;
                }
            }
            VadState::Speech => {
                if is_speech {
                    self.silence_run_ms = 0;
                } else {
                    self.silence_run_ms += frame_ms;
                    if self.silence_run_ms >= self.config.min_silence_ms {
                        self.state = VadState::Silence;
                        self.speech_run_ms = 0;
                        let end_ms = frame.timestamp_ms.saturating_sub(self.silence_run_ms);
                        let duration_ms = end_ms.saturating_sub(self.speech_started_ms);
                        self.last_speech_end_ms = Some(end_ms);
                        return Some(VadEvent::SpeechEnd {
                            timestamp_ms: end_ms,
                            duration_ms,
                        });
                    }
                }
            }
        }
        None
    }

    pub fn is_speaking(&self) -> bool {
        self.state == VadState::Speech
    }

    /// Silence observed since the last confirmed speech end, measured at
    /// `now_ms` on the session audio clock. Zero while speech is active
    /// or before any speech was seen.
    pub fn silence_since_speech_ms(&self, now_ms: u64) -> u64 {
        if self.state == VadState::Speech {
            return 0;
        }
        match self.last_speech_end_ms {
            Some(end) => now_ms.saturating_sub(end),
            None => 0,
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.state = VadState::Silence;
        self.speech_run_ms = 0;
        self.silence_run_ms = 0;
        self.last_speech_end_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{Channels, SampleRate};

    fn model() -> Arc<EnergyVadModel> {
        prewarm_vad(&VadConfig::default()).unwrap()
    }

    fn loud_frame(timestamp_ms: u64) -> AudioFrame {
        AudioFrame::new(vec![0.5; 320], SampleRate::Hz16000, Channels::Mono, timestamp_ms)
    }

    fn silent_frame(timestamp_ms: u64) -> AudioFrame {
        AudioFrame::silence(20, SampleRate::Hz16000, timestamp_ms)
    }

    #[test]
    fn test_load_rejects_bad_threshold() {
        let config = VadConfig {
            threshold_db: f32::NAN,
            ..Default::default()
        };
        assert!(EnergyVadModel::load(&config).is_err());

        let config = VadConfig {
            threshold_db: 3.0,
            ..Default::default()
        };
        assert!(EnergyVadModel::load(&config).is_err());
    }

    #[test]
    fn test_silence_emits_no_speech_start() {
        let mut vad = VadSession::new(model(), VadConfig::default());
        for i in 0..500 {
            assert_eq!(vad.process(&silent_frame(i * 20)), None);
        }
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_speech_boundaries() {
        let mut vad = VadSession::new(model(), VadConfig::default());
        let mut events = Vec::new();
        let mut ts = 0;

        for _ in 0..20 {
            if let Some(e) = vad.process(&loud_frame(ts)) {
                events.push(e);
            }
            ts += 20;
        }
        assert!(matches!(events.as_slice(), [VadEvent::SpeechStart { .. }]));
        assert!(vad.is_speaking());

        for _ in 0..30 {
            if let Some(e) = vad.process(&silent_frame(ts)) {
                events.push(e);
            }
            ts += 20;
        }
        assert_eq!(events.len(), 2);
        match events[1] {
            VadEvent::SpeechEnd { duration_ms, .. } => assert!(duration_ms > 0),
            _ => panic!("expected speech end"),
        }
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_silence_clock() {
        let mut vad = VadSession::new(model(), VadConfig::default());
        let mut ts = 0;
        for _ in 0..20 {
            vad.process(&loud_frame(ts));
            ts += 20;
        }
        for _ in 0..30 {
            vad.process(&silent_frame(ts));
            ts += 20;
        }
        let silence = vad.silence_since_speech_ms(ts);
        assert!(silence >= VadConfig::default().min_silence_ms);
    }

    #[test]
    fn test_short_blip_is_ignored() {
        let config = VadConfig {
            min_speech_ms: 100,
            ..Default::default()
        };
        let mut vad = VadSession::new(model(), config);
        // Two loud frames (40 ms) below the 100 ms minimum
        assert_eq!(vad.process(&loud_frame(0)), None);
        assert_eq!(vad.process(&loud_frame(20)), None);
        for i in 0..10 {
            assert_eq!(vad.process(&silent_frame(40 + i * 20)), None);
        }
        assert!(!vad.is_speaking());
    }
}
