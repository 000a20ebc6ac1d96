//! Metric events emitted by pipeline stages and the per-session usage summary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The pipeline stage that produced a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Vad,
    TurnDetector,
    Recognizer,
    Generator,
    Synthesizer,
    Orchestrator,
    Transport,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Vad => "vad",
            StageKind::TurnDetector => "turn_detector",
            StageKind::Recognizer => "recognizer",
            StageKind::Generator => "generator",
            StageKind::Synthesizer => "synthesizer",
            StageKind::Orchestrator => "orchestrator",
            StageKind::Transport => "transport",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named measurement tagged with the producing stage and a timestamp.
/// Immutable; appended to the metrics collector's aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvent {
    pub stage: StageKind,
    pub name: String,
    pub value: f64,
    /// Milliseconds since session start
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
}

impl MetricEvent {
    pub fn new(stage: StageKind, name: impl Into<String>, value: f64, timestamp_ms: u64) -> Self {
        Self {
            stage,
            name: name.into(),
            value,
            timestamp_ms,
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Usage totals for one session, produced exactly once on shutdown
/// regardless of how the session ended. All fields are non-negative by
/// construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub session_id: String,
    /// Wall-clock session duration
    pub session_duration_ms: u64,
    /// Recognized participant speech duration
    pub speech_duration_ms: u64,
    pub generation_calls: u64,
    pub interruptions: u64,
    pub tokens_generated: u64,
    pub characters_synthesized: u64,
    /// Mean generator time-to-first-token, if any call completed one
    pub time_to_first_token_ms: Option<u64>,
}
