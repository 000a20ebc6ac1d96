//! Utterances: transcript fragments with partial/final semantics.

use serde::{Deserialize, Serialize};

/// Who holds the conversational floor for an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Participant,
    Agent,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Participant => "participant",
            Speaker::Agent => "agent",
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A transcript fragment.
///
/// Partial utterances are superseded in place until finalized or discarded.
/// Once `is_final` is set the text is never edited again; final utterances
/// are only ever appended to session history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
    /// Start of the utterance relative to session start
    pub started_at_ms: u64,
    /// End of the utterance; equals `started_at_ms` while still open
    pub ended_at_ms: u64,
    pub is_final: bool,
}

impl Utterance {
    /// An in-progress fragment, subject to revision.
    pub fn partial(speaker: Speaker, text: impl Into<String>, started_at_ms: u64) -> Self {
        Self {
            speaker,
            text: text.into(),
            started_at_ms,
            ended_at_ms: started_at_ms,
            is_final: false,
        }
    }

    /// A terminal fragment for the current turn.
    pub fn final_(
        speaker: Speaker,
        text: impl Into<String>,
        started_at_ms: u64,
        ended_at_ms: u64,
    ) -> Self {
        Self {
            speaker,
            text: text.into(),
            started_at_ms,
            ended_at_ms,
            is_final: true,
        }
    }

    /// Replace the text of a partial. No-op on finals.
    pub fn revise(&mut self, text: impl Into<String>) {
        if !self.is_final {
            self.text = text.into();
        }
    }

    /// Mark the fragment terminal.
    pub fn finalize(&mut self, ended_at_ms: u64) {
        self.is_final = true;
        self.ended_at_ms = ended_at_ms;
    }

    pub fn duration_ms(&self) -> u64 {
        self.ended_at_ms.saturating_sub(self.started_at_ms)
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}
