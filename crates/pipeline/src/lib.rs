//! Voice session pipeline: VAD, turn detection, metrics, and the
//! session orchestrator.
//!
//! The orchestrator is the only component with write access to session
//! state; every other module here is a stateless transformer or reports
//! observations to it.

pub mod metrics;
pub mod orchestrator;
pub mod sentence;
pub mod turn;
pub mod vad;

pub use metrics::{MetricsCollector, MetricsHandle};
pub use orchestrator::{OrchestratorConfig, SessionOrchestrator, StageSet};
pub use sentence::SentenceBuffer;
pub use turn::{Completeness, HeuristicTurnDetector};
pub use vad::{prewarm_vad, EnergyVadModel, VadSession};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("VAD error: {0}")]
    Vad(String),

    #[error("Turn detection error: {0}")]
    TurnDetection(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout after {0} ms")]
    Timeout(u64),
}

impl From<PipelineError> for parley_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Vad(msg) => parley_core::Error::Prewarm(msg),
            PipelineError::TurnDetection(msg) => {
                parley_core::Error::stage(parley_core::StageKind::TurnDetector, msg)
            }
            PipelineError::Model(msg) => parley_core::Error::Prewarm(msg),
            PipelineError::ChannelClosed => parley_core::Error::ChannelClosed,
            PipelineError::Timeout(ms) => parley_core::Error::Timeout(ms),
        }
    }
}
