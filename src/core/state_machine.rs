//! Session State Machine
//!
//! Tracks the device session lifecycle and decides which commands the
//! device may receive in each state.

use super::error::EngineError;
use super::protocol::Command;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No channel open
    Idle,
    /// Channel open, commands answered one at a time
    Ready,
    /// Sample stream running
    Acquiring,
    /// Latched fault, needs reset or disconnect
    Error,
}

impl SessionState {
    /// Check if a channel is open
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Ready | Self::Acquiring)
    }

    /// Check if state is a latched fault
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Acquiring => "acquiring",
            Self::Error => "error",
        })
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: SessionState,
    /// New state
    pub to: SessionState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
}

/// Session state machine
pub struct SessionStateMachine {
    state: SessionState,
    history: Vec<StateTransition>,
    max_history: usize,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    /// Create a new state machine in `idle`
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            history: Vec::new(),
            max_history: 100,
        }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get state history
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: SessionState, reason: Option<&str>) -> Result<(), String> {
        if !self.is_valid_transition(new_state) {
            return Err(format!(
                "Invalid transition from {} to {}",
                self.state, new_state
            ));
        }

        self.history.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Local::now(),
            reason: reason.map(String::from),
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        self.state = new_state;
        Ok(())
    }

    fn is_valid_transition(&self, new_state: SessionState) -> bool {
        use SessionState::*;

        match (self.state, new_state) {
            (Idle, Ready) => true,

            (Ready, Acquiring) => true,
            (Ready, Idle) => true,

            (Acquiring, Ready) => true,
            (Acquiring, Idle) => true,

            (Error, Idle) => true,

            // Any state may latch a fault
            (_, Error) => true,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    /// Check whether `command` may be sent in the current state
    pub fn admit(&self, command: &Command) -> Result<(), EngineError> {
        let allowed = match self.state {
            SessionState::Ready => true,
            SessionState::Acquiring => command.allowed_while_acquiring(),
            SessionState::Idle | SessionState::Error => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(EngineError::CommandRejected {
                command: command.name().to_string(),
                state: self.state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_transitions() {
        let mut sm = SessionStateMachine::new();
        assert_eq!(sm.state(), SessionState::Idle);

        sm.transition(SessionState::Ready, Some("probe ok")).unwrap();
        sm.transition(SessionState::Acquiring, Some("start acked")).unwrap();
        sm.transition(SessionState::Ready, Some("end")).unwrap();
        assert_eq!(sm.history().len(), 3);
        assert_eq!(sm.history().last().map(|t| t.from), Some(SessionState::Acquiring));
        assert!(sm.state().is_connected());
    }

    #[test]
    fn test_invalid_transition() {
        let mut sm = SessionStateMachine::new();
        assert!(sm.transition(SessionState::Acquiring, None).is_err());

        sm.transition(SessionState::Error, Some("timeout")).unwrap();
        assert!(sm.transition(SessionState::Ready, None).is_err());
        sm.transition(SessionState::Idle, Some("reset")).unwrap();
    }

    #[test]
    fn test_admission_per_state() {
        let mut sm = SessionStateMachine::new();
        let err = sm.admit(&Command::Start).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CommandRejected { state: SessionState::Idle, .. }
        ));

        sm.transition(SessionState::Ready, None).unwrap();
        assert!(sm.admit(&Command::Volt(3000)).is_ok());

        sm.transition(SessionState::Acquiring, None).unwrap();
        assert!(sm.admit(&Command::Volt(3000)).is_err());
        assert!(sm.admit(&Command::Stop).is_ok());
        assert!(sm.admit(&Command::TargetReset(100)).is_ok());

        sm.transition(SessionState::Error, None).unwrap();
        assert!(sm.admit(&Command::Stop).is_err());
    }
}
