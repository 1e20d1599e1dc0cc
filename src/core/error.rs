//! Engine error taxonomy
//!
//! Every failure the protocol engine reports to its caller is one of these
//! variants. The enum is `Clone` so the same value can be returned to the
//! caller that issued a command and broadcast to event subscribers.

use super::protocol::FramingError;
use super::state_machine::SessionState;
use super::transport::TransportError;
use thiserror::Error;

/// Protocol engine error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A command parameter failed local validation. Nothing was sent.
    #[error("Invalid parameter `{field}`: {reason}")]
    InvalidParameter {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Opening the channel or the connect probe failed, or the link was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// No response arrived within the response timeout
    #[error("Command `{command}` timed out after {timeout_ms} ms")]
    CommandTimeout {
        /// Command name
        command: String,
        /// Timeout that expired
        timeout_ms: u64,
    },

    /// The device answered with an error line
    #[error("Device rejected `{command}`: {code}")]
    Device {
        /// Command name
        command: String,
        /// Error text reported by the device
        code: String,
    },

    /// The device acknowledged a different command than the outstanding one
    #[error("Expected reply to `{expected}`, got ack for `{received}`")]
    ResponseMismatch {
        /// Outstanding command
        expected: String,
        /// Command named in the reply
        received: String,
    },

    /// The stream could not be realigned within the resync window
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// The command is not allowed in the current session state
    #[error("Command `{command}` not allowed while {state}")]
    CommandRejected {
        /// Command name
        command: String,
        /// State at the time of the request
        state: SessionState,
    },

    /// Another command is still waiting for its response
    #[error("Command `{issued}` issued while `{outstanding}` is still outstanding")]
    CommandPending {
        /// Command that was refused
        issued: String,
        /// Command still in flight
        outstanding: String,
    },

    /// The session worker is gone
    #[error("Session worker has shut down")]
    Shutdown,
}

impl EngineError {
    /// Shorthand for [`EngineError::InvalidParameter`]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }

    /// Errors that latch the session into the `error` state
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CommandTimeout { .. } | Self::Framing(_))
    }
}

impl From<TransportError> for EngineError {
    fn from(err: TransportError) -> Self {
        Self::Connection(err.to_string())
    }
}
