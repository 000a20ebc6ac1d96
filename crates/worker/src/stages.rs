//! Stage wiring from configuration.
//!
//! Selects a concrete provider for each capability seam and assembles
//! the component graph a new orchestrator needs.

use std::sync::Arc;

use parley_config::{ProviderConfig, ProviderKind};
use parley_core::{
    NoiseSuppressor, ResponseGenerator, SpeechRecognizer, SpeechSynthesizer, TurnDetector,
    VadModel,
};
use parley_pipeline::{HeuristicTurnDetector, StageSet};
use parley_providers::{
    ChatHttpGenerator, HttpRecognizer, HttpSynthesizer, NullSuppressor, ScriptedGenerator,
    ScriptedRecognizer, ScriptedSynthesizer,
};

/// Build the stage set for one session from validated configuration.
pub fn build_stages(
    config: &ProviderConfig,
    vad_model: Arc<dyn VadModel>,
) -> parley_core::Result<StageSet> {
    let recognizer: Arc<dyn SpeechRecognizer> = match config.stt.provider {
        ProviderKind::Scripted => Arc::new(ScriptedRecognizer::new(Vec::new())),
        ProviderKind::Http => Arc::new(HttpRecognizer::new(&config.stt)?),
    };

    let generator: Arc<dyn ResponseGenerator> = match config.generator.provider {
        ProviderKind::Scripted => Arc::new(ScriptedGenerator::new(Vec::new())),
        ProviderKind::Http => Arc::new(ChatHttpGenerator::new(&config.generator)?),
    };

    let synthesizer: Arc<dyn SpeechSynthesizer> = match config.tts.provider {
        ProviderKind::Scripted => Arc::new(ScriptedSynthesizer::new()),
        ProviderKind::Http => Arc::new(HttpSynthesizer::new(&config.tts)?),
    };

    let turn_detector: Arc<dyn TurnDetector> =
        Arc::new(HeuristicTurnDetector::new(config.turn.clone()));

    let suppressor: Option<Arc<dyn NoiseSuppressor>> = config
        .noise_suppression
        .then(|| Arc::new(NullSuppressor) as Arc<dyn NoiseSuppressor>);

    tracing::info!(
        stt = recognizer.model_name(),
        llm = generator.model_name(),
        tts = synthesizer.model_name(),
        vad = vad_model.model_name(),
        noise_suppression = suppressor.is_some(),
        "stages wired"
    );

    Ok(StageSet {
        vad_model,
        recognizer,
        generator,
        synthesizer,
        turn_detector,
        suppressor,
    })
}
