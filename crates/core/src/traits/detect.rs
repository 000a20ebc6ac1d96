//! Detection-side interfaces: VAD model, noise suppression, turn detection.

use crate::audio::AudioFrame;
use crate::transcript::Utterance;

/// Speech boundary events emitted by the VAD, tagged with the triggering
/// frame timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStart {
        timestamp_ms: u64,
    },
    SpeechEnd {
        timestamp_ms: u64,
        /// Duration of the speech segment that just ended
        duration_ms: u64,
    },
}

/// A prewarmed voice-activity model.
///
/// Loaded once per process before any session starts and shared read-only
/// across sessions; per-session smoothing state lives elsewhere.
pub trait VadModel: Send + Sync + 'static {
    /// Speech likelihood for one frame, in [0, 1].
    fn score(&self, frame: &AudioFrame) -> f32;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

/// Optional inbound-audio cleanup applied before VAD and STT.
pub trait NoiseSuppressor: Send + Sync + 'static {
    fn process(&self, frame: AudioFrame) -> AudioFrame;

    fn name(&self) -> &str;
}

/// Turn-detector verdict. Purely advisory; the orchestrator is the sole
/// authority on turn transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDecision {
    /// The participant has yielded the floor
    Yield,
    /// The participant likely intends to continue
    Continue,
}

/// Predicts whether the participant has finished a conversational turn,
/// given the most recent transcript fragment and the silence observed
/// since speech ended.
pub trait TurnDetector: Send + Sync + 'static {
    fn evaluate(&self, recent: Option<&Utterance>, silence_ms: u64) -> TurnDecision;

    fn name(&self) -> &str;
}
