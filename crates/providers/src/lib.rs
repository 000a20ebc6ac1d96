//! Stage provider implementations.
//!
//! Two families: HTTP-backed providers for remote STT/LLM/TTS services
//! and deterministic scripted providers for tests and local runs. Both
//! implement the capability traits from `parley-core`; selection happens
//! at startup from configuration.

pub mod generator;
pub mod scripted;
pub mod speech;

pub use generator::ChatHttpGenerator;
pub use scripted::{
    ChannelSource, LoopbackTransport, MemorySink, NullSuppressor, ScriptedGenerator,
    ScriptedRecognizer, ScriptedSynthesizer,
};
pub use speech::{HttpRecognizer, HttpSynthesizer};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider configuration: {0}")]
    Configuration(String),

    #[error("unsupported provider selection: {0}")]
    Unsupported(String),
}

impl From<ProviderError> for parley_core::Error {
    fn from(err: ProviderError) -> Self {
        parley_core::Error::Config(err.to_string())
    }
}
