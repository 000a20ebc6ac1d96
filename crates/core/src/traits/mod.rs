//! Capability traits for the pluggable provider stages.
//!
//! Each stage is a capability interface with one streaming operation;
//! concrete implementations are selected at startup from configuration,
//! never via inheritance-style hierarchies.

pub mod detect;
pub mod generate;
pub mod speech;
pub mod transport;

pub use detect::{NoiseSuppressor, TurnDecision, TurnDetector, VadEvent, VadModel};
pub use generate::{GenerateRequest, ReplyChunk, ResponseGenerator};
pub use speech::{SpeechRecognizer, SpeechSynthesizer};
pub use transport::{AudioSink, AudioSource, Transport};
