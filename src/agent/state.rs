//! ReAct state machine
//!
//! ```text
//! Idle → Thinking → ActingToolCall → Observing → Thinking ...
//!           │             │              │
//!           └─────────────┴──────────────┴──→ Finished | Aborted | Cancelled
//! ```
//!
//! `Finished` is only reachable from `Thinking` (a final answer); every
//! non-terminal state may abort or be cancelled.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Waiting for a user message
    Idle,
    /// Streaming a completion from the model
    Thinking,
    /// Validating and executing a tool call
    ActingToolCall,
    /// Feeding the tool result back into the conversation
    Observing,
    Finished,
    Aborted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid agent state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: AgentState,
    pub to: AgentState,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Finished | AgentState::Aborted | AgentState::Cancelled)
    }

    pub fn can_transition_to(&self, next: AgentState) -> bool {
        use AgentState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Aborted | Cancelled) => true,
            (Idle, Thinking) => true,
            (Thinking, ActingToolCall | Finished) => true,
            (ActingToolCall, Observing) => true,
            (Observing, Thinking) => true,
            _ => false,
        }
    }

    pub fn advance(self, next: AgentState) -> Result<AgentState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Thinking => "thinking",
            AgentState::ActingToolCall => "acting_tool_call",
            AgentState::Observing => "observing",
            AgentState::Finished => "finished",
            AgentState::Aborted => "aborted",
            AgentState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgentState::*;

    #[test]
    fn test_react_cycle() {
        let state = Idle.advance(Thinking).unwrap();
        let state = state.advance(ActingToolCall).unwrap();
        let state = state.advance(Observing).unwrap();
        let state = state.advance(Thinking).unwrap();
        assert_eq!(state.advance(Finished).unwrap(), Finished);
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(Idle.advance(ActingToolCall).is_err());
        assert!(Observing.advance(Finished).is_err());
        assert!(ActingToolCall.advance(Thinking).is_err());
        let err = Finished.advance(Cancelled).unwrap_err();
        assert_eq!(err.to_string(), "invalid agent state transition finished -> cancelled");
    }

    #[test]
    fn test_abort_and_cancel_from_any_live_state() {
        for state in [Idle, Thinking, ActingToolCall, Observing] {
            assert!(state.can_transition_to(Aborted));
            assert!(state.can_transition_to(Cancelled));
        }
        assert!(!Cancelled.can_transition_to(Aborted));
    }
}
