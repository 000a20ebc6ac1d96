//! Session state and the turn state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transcript::Utterance;

/// Turn/interruption states.
///
/// The cycle is `Listening -> Recognizing -> Thinking -> Speaking ->
/// Listening`, with `Interrupted` reachable from `Thinking` or `Speaking`
/// on barge-in and `Closed` as the only terminal state. Exactly one state
/// is active per session; all writes funnel through the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    Listening,
    /// STT active on the participant's turn
    Recognizing,
    /// Response generation in flight
    Thinking,
    /// Synthesized frames flowing to the sink
    Speaking,
    /// Barge-in detected; agent output being cancelled
    Interrupted,
    /// Terminal; no transitions out
    Closed,
}

impl TurnState {
    /// Transitions the orchestrator may take from this state.
    pub fn allowed_transitions(&self) -> &'static [TurnState] {
        match self {
            TurnState::Listening => &[TurnState::Recognizing, TurnState::Closed],
            TurnState::Recognizing => &[
                TurnState::Thinking,
                TurnState::Listening,
                TurnState::Closed,
            ],
            TurnState::Thinking => &[
                TurnState::Speaking,
                TurnState::Interrupted,
                TurnState::Listening,
                TurnState::Closed,
            ],
            TurnState::Speaking => &[
                TurnState::Listening,
                TurnState::Interrupted,
                TurnState::Closed,
            ],
            TurnState::Interrupted => &[TurnState::Recognizing, TurnState::Closed],
            TurnState::Closed => &[],
        }
    }

    pub fn can_transition_to(&self, target: TurnState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Closed)
    }

    /// The agent holds the floor in these states.
    pub fn agent_has_floor(&self) -> bool {
        matches!(self, TurnState::Thinking | TurnState::Speaking)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Listening => "listening",
            TurnState::Recognizing => "recognizing",
            TurnState::Thinking => "thinking",
            TurnState::Speaking => "speaking",
            TurnState::Interrupted => "interrupted",
            TurnState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection state of the session's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Disconnected,
}

/// One conversational exchange between one participant and the agent.
///
/// Owned exclusively by the orchestrator; created on connect, destroyed on
/// disconnect or explicit shutdown. History is append-only: final
/// utterances are never edited after being recorded.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub connection: ConnectionState,
    turn_state: TurnState,
    history: Vec<Utterance>,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            connection: ConnectionState::Connecting,
            turn_state: TurnState::Listening,
            history: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn_state
    }

    /// Move the state machine. Illegal transitions are rejected so a bug
    /// in the orchestrator cannot silently corrupt turn bookkeeping.
    pub fn transition(&mut self, target: TurnState) -> Result<()> {
        if !self.turn_state.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                from: self.turn_state,
                to: target,
            });
        }
        tracing::debug!(
            session_id = %self.id,
            from = %self.turn_state,
            to = %target,
            "turn state transition"
        );
        self.turn_state = target;
        Ok(())
    }

    /// Append an utterance to history. Interrupted agent replies are
    /// recorded non-final for audit; everything else arrives final.
    pub fn record(&mut self, utterance: Utterance) {
        self.history.push(utterance);
    }

    pub fn history(&self) -> &[Utterance] {
        &self.history
    }

    pub fn is_closed(&self) -> bool {
        self.turn_state.is_terminal()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
