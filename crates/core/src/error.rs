//! Error taxonomy shared across the workspace.
//!
//! Configuration and prewarm errors are fatal before any session is
//! accepted; transport errors close the session; stage errors are
//! recoverable and retried by the orchestrator. Cancellation is not an
//! error and has no variant here.

use thiserror::Error;

use crate::metric::StageKind;
use crate::session::TurnState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Missing credentials or invalid provider selection. Fatal at start.
    #[error("configuration error: {0}")]
    Config(String),

    /// Model load failure at prewarm. Fatal; no sessions are accepted.
    #[error("prewarm failed: {0}")]
    Prewarm(String),

    /// Connection drop or handshake failure. Closes the session.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single STT/LLM/TTS call failed. Retried with backoff before the
    /// orchestrator falls back to a spoken apology.
    #[error("{stage} stage failed: {message}")]
    Stage {
        stage: StageKind,
        message: String,
        retryable: bool,
    },

    #[error("channel closed")]
    ChannelClosed,

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("invalid turn transition: {from} -> {to}")]
    InvalidTransition { from: TurnState, to: TurnState },

    #[error("session closed")]
    SessionClosed,
}

impl Error {
    pub fn stage(stage: StageKind, message: impl Into<String>) -> Self {
        Error::Stage {
            stage,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn stage_fatal(stage: StageKind, message: impl Into<String>) -> Self {
        Error::Stage {
            stage,
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether the orchestrator should retry the failed call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Stage { retryable, .. } => *retryable,
            Error::Timeout(_) => true,
            _ => false,
        }
    }
}
