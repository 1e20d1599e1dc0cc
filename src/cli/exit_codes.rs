//! CLI Exit Codes
//!
//! Process exit codes for scripted measurement runs.

use crate::config::ConfigError;
use crate::core::error::EngineError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments or parameter out of range
    pub const INVALID_ARGS: u8 = 2;

    /// Opening the port or the connect probe failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// The board did not answer in time
    pub const TIMEOUT: u8 = 4;

    /// Output file could not be written
    pub const FILE_ERROR: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Unexpected reply or undecodable stream
    pub const PROTOCOL_ERROR: u8 = 9;

    /// The board rejected a command
    pub const DEVICE_ERROR: u8 = 10;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Command not allowed in the current session state
    pub const DEVICE_BUSY: u8 = 13;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message for the user
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&EngineError> for CliResult {
    fn from(err: &EngineError) -> Self {
        let code = match err {
            EngineError::InvalidParameter { .. } => ExitCodes::INVALID_ARGS,
            EngineError::Connection(_) => ExitCodes::CONNECTION_FAILED,
            EngineError::CommandTimeout { .. } => ExitCodes::TIMEOUT,
            EngineError::Device { .. } => ExitCodes::DEVICE_ERROR,
            EngineError::ResponseMismatch { .. } | EngineError::Framing(_) => ExitCodes::PROTOCOL_ERROR,
            EngineError::CommandRejected { .. } | EngineError::CommandPending { .. } => ExitCodes::DEVICE_BUSY,
            EngineError::Shutdown => ExitCodes::INTERNAL_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&TransportError> for CliResult {
    fn from(err: &TransportError) -> Self {
        let code = match err {
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::ConnectionFailed(_) | TransportError::Disconnected => ExitCodes::CONNECTION_FAILED,
            TransportError::IoError(_) => ExitCodes::ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&ConfigError> for CliResult {
    fn from(err: &ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

fn io_code(kind: std::io::ErrorKind) -> u8 {
    use std::io::ErrorKind;

    match kind {
        ErrorKind::NotFound => ExitCodes::FILE_ERROR,
        ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
        ErrorKind::TimedOut => ExitCodes::TIMEOUT,
        _ => ExitCodes::ERROR,
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        Self::Error(io_code(err.kind()), err.to_string())
    }
}

impl From<&anyhow::Error> for CliResult {
    /// Picks the most specific code found in the error chain
    fn from(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        for cause in err.chain() {
            let code = if let Some(e) = cause.downcast_ref::<EngineError>() {
                CliResult::from(e).code()
            } else if let Some(e) = cause.downcast_ref::<TransportError>() {
                CliResult::from(e).code()
            } else if cause.downcast_ref::<ConfigError>().is_some() {
                ExitCodes::CONFIG_ERROR
            } else if let Some(e) = cause.downcast_ref::<std::io::Error>() {
                io_code(e.kind())
            } else {
                continue;
            };
            return Self::Error(code, message);
        }
        Self::Error(ExitCodes::ERROR, message)
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Board did not answer in time",
        6 => "File error",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        10 => "Board rejected a command",
        11 => "Operation cancelled",
        13 => "Command not allowed in the current state",
        14 => "Port not found",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state_machine::SessionState;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));
    }

    #[test]
    fn test_engine_error_codes() {
        let timeout = EngineError::CommandTimeout {
            command: "freq".to_string(),
            timeout_ms: 1000,
        };
        assert_eq!(CliResult::from(&timeout).code(), ExitCodes::TIMEOUT);

        let rejected = EngineError::CommandRejected {
            command: "volt".to_string(),
            state: SessionState::Acquiring,
        };
        assert_eq!(CliResult::from(&rejected).code(), ExitCodes::DEVICE_BUSY);
        assert_eq!(
            CliResult::from(&EngineError::invalid("freq", "unsupported")).code(),
            ExitCodes::INVALID_ARGS
        );
    }

    #[test]
    fn test_anyhow_chain_uses_engine_code() {
        let err = anyhow::Error::new(EngineError::Connection("probe failed".to_string()))
            .context("connecting to COM3");
        let result = CliResult::from(&err);
        assert_eq!(result.code(), ExitCodes::CONNECTION_FAILED);
        assert!(result.message().unwrap().contains("probe failed"));

        let plain = anyhow::anyhow!("something else");
        assert_eq!(CliResult::from(&plain).code(), ExitCodes::ERROR);
    }

    #[test]
    fn test_from_io_error() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let result = CliResult::from(err);
        assert_eq!(result.code(), ExitCodes::FILE_ERROR);
    }
}
