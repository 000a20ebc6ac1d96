//! Response generation interface.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::transcript::Utterance;

/// Input for one response-generation call: the session's utterance history
/// plus a fixed persona. The persona is opaque configuration; the
/// orchestrator never parses or templates it.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub persona: String,
    /// Final utterances plus any non-final agent fragments that were
    /// actually spoken before an interruption.
    pub history: Vec<Utterance>,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl GenerateRequest {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            history: Vec::new(),
            max_tokens: 256,
            temperature: 0.7,
        }
    }

    pub fn with_history(mut self, history: Vec<Utterance>) -> Self {
        self.history = history;
        self
    }
}

/// One streamed text delta of the agent's reply.
///
/// Absent cancellation, the stream terminates with a chunk whose
/// `is_final` flag is set (its text may be empty).
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyChunk {
    pub text: String,
    pub is_final: bool,
}

impl ReplyChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    /// The completion marker.
    pub fn done() -> Self {
        Self {
            text: String::new(),
            is_final: true,
        }
    }
}

/// Language-generation interface.
///
/// Cancellation happens by dropping the stream; the partial output already
/// produced is still charged to the metrics collector by the orchestrator.
/// Determinism is not required.
#[async_trait]
pub trait ResponseGenerator: Send + Sync + 'static {
    /// Stream the reply as text deltas.
    fn generate_stream<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<ReplyChunk>> + Send + 'a>>;

    /// Whether the backend is reachable and the model loaded.
    async fn is_available(&self) -> bool {
        true
    }

    /// Model name for logging
    fn model_name(&self) -> &str;

    /// Rough token estimate used for usage accounting when the backend
    /// does not report counts.
    fn estimate_tokens(&self, text: &str) -> usize {
        text.len() / 4
    }
}
