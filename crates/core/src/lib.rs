//! Core traits and types for the Parley voice session orchestrator
//!
//! This crate provides foundational types used across all other crates:
//! - Capability traits for pluggable stages (VAD, STT, LLM, TTS, turn
//!   detection, noise suppression, transport)
//! - Audio frame types and energy helpers
//! - Utterance and session/turn-state types
//! - Metric events and the usage summary
//! - Error taxonomy

pub mod audio;
pub mod error;
pub mod metric;
pub mod session;
pub mod transcript;
pub mod traits;

pub use audio::{AudioEncoding, AudioFrame, Channels, SampleRate, VoiceSettings};
pub use error::{Error, Result};
pub use metric::{MetricEvent, StageKind, UsageSummary};
pub use session::{ConnectionState, Session, TurnState};
pub use transcript::{Speaker, Utterance};

pub use traits::{
    // Detection
    NoiseSuppressor, TurnDecision, TurnDetector, VadEvent, VadModel,
    // Generation
    GenerateRequest, ReplyChunk, ResponseGenerator,
    // Speech
    SpeechRecognizer, SpeechSynthesizer,
    // Transport
    AudioSink, AudioSource, Transport,
};
