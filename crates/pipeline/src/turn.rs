//! Heuristic turn detection.
//!
//! Classifies the most recent transcript fragment for completeness and
//! scales the silence threshold accordingly. Purely advisory: the
//! orchestrator may override on explicit interruption signals.

use parley_config::TurnConfig;
use parley_core::{TurnDecision, TurnDetector, Utterance};

/// Utterance completeness classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// Mid-sentence; wait longer
    Incomplete,
    /// Could go either way
    PossiblyComplete,
    /// Terminal punctuation; respond promptly
    Complete,
    /// Question detected; respond promptly
    Question,
    /// Acknowledgement filler; don't grab the floor
    Backchannel,
}

impl Completeness {
    /// Multiplier applied to the configured base silence threshold.
    fn silence_scale(&self) -> f64 {
        match self {
            Completeness::Incomplete => 1.6,
            Completeness::PossiblyComplete => 1.0,
            Completeness::Complete => 0.6,
            Completeness::Question => 0.5,
            Completeness::Backchannel => 2.0,
        }
    }
}

/// Rule-based classification of obvious cases.
pub fn classify(text: &str) -> Completeness {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Completeness::Incomplete;
    }

    if trimmed.ends_with('?') {
        return Completeness::Question;
    }

    let lower = trimmed.to_lowercase();

    let question_openers = ["what", "where", "when", "who", "how", "why", "can", "could", "do", "does", "is", "are"];
    let first_word = lower.split_whitespace().next().unwrap_or("");
    if question_openers.contains(&first_word) && trimmed.split_whitespace().count() > 2 {
        return Completeness::Question;
    }

    let backchannels = ["ok", "okay", "yeah", "yes", "no", "right", "sure", "mm-hmm", "uh-huh", "got it"];
    if backchannels.iter().any(|bc| lower == *bc) {
        return Completeness::Backchannel;
    }

    let trailing_connectives = ["and", "but", "so", "because", "that", "which", "when", "if", "or", "the", "a", "to"];
    if let Some(last_word) = lower.split_whitespace().last() {
        if trailing_connectives.contains(&last_word) {
            return Completeness::Incomplete;
        }
    }

    if trimmed.ends_with('.') || trimmed.ends_with('!') {
        return Completeness::Complete;
    }

    Completeness::PossiblyComplete
}

/// Default turn detector: silence past a completeness-scaled threshold
/// with no pending partial means the floor was yielded.
pub struct HeuristicTurnDetector {
    config: TurnConfig,
}

impl HeuristicTurnDetector {
    pub fn new(config: TurnConfig) -> Self {
        Self { config }
    }

    fn threshold_ms(&self, recent: Option<&Utterance>) -> u64 {
        let scale = recent
            .map(|u| classify(&u.text).silence_scale())
            .unwrap_or(1.0);
        (self.config.yield_silence_ms as f64 * scale) as u64
    }
}

impl TurnDetector for HeuristicTurnDetector {
    fn evaluate(&self, recent: Option<&Utterance>, silence_ms: u64) -> TurnDecision {
        // A pending partial means the recognizer is still revising; hold.
        if matches!(recent, Some(u) if !u.is_final && u.is_empty()) {
            return TurnDecision::Continue;
        }
        if silence_ms >= self.threshold_ms(recent) {
            TurnDecision::Yield
        } else {
            TurnDecision::Continue
        }
    }

    fn name(&self) -> &str {
        "heuristic-turn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Speaker;

    fn detector() -> HeuristicTurnDetector {
        HeuristicTurnDetector::new(TurnConfig::default())
    }

    fn partial(text: &str) -> Utterance {
        Utterance::partial(Speaker::Participant, text, 0)
    }

    #[test]
    fn test_classify_question() {
        assert_eq!(classify("What time do you open?"), Completeness::Question);
        assert_eq!(classify("how much is a day pass"), Completeness::Question);
    }

    #[test]
    fn test_classify_incomplete_trailer() {
        assert_eq!(classify("I was thinking that"), Completeness::Incomplete);
        assert_eq!(classify("we could go and"), Completeness::Incomplete);
    }

    #[test]
    fn test_classify_terminal_punctuation() {
        assert_eq!(classify("I'd like to book a court."), Completeness::Complete);
    }

    #[test]
    fn test_classify_backchannel() {
        assert_eq!(classify("okay"), Completeness::Backchannel);
        assert_eq!(classify("yeah"), Completeness::Backchannel);
    }

    #[test]
    fn test_yield_after_silence_threshold() {
        let d = detector();
        let u = partial("hello there");
        assert_eq!(d.evaluate(Some(&u), 100), TurnDecision::Continue);
        assert_eq!(d.evaluate(Some(&u), 600), TurnDecision::Yield);
    }

    #[test]
    fn test_question_yields_sooner() {
        let d = detector();
        let u = partial("what are your hours?");
        // 550 * 0.5 = 275ms threshold for questions
        assert_eq!(d.evaluate(Some(&u), 300), TurnDecision::Yield);

        let v = partial("I wanted to ask about the");
        assert_eq!(d.evaluate(Some(&v), 300), TurnDecision::Continue);
    }

    #[test]
    fn test_empty_pending_partial_holds_the_floor() {
        let d = detector();
        let u = partial("");
        assert_eq!(d.evaluate(Some(&u), 10_000), TurnDecision::Continue);
    }

    #[test]
    fn test_no_utterance_uses_base_threshold() {
        let d = detector();
        assert_eq!(d.evaluate(None, 500), TurnDecision::Continue);
        assert_eq!(d.evaluate(None, 560), TurnDecision::Yield);
    }
}
