//! CLI Module
//!
//! Provides command-line support shared by the binary:
//! - Exit codes for automation
//! - Log subscriber setup

pub mod exit_codes;
pub mod logging;

pub use exit_codes::{exit_code_description, CliResult, ExitCodes};
pub use logging::init_logging;

use clap::ValueEnum;

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON for scripting
    Json,
}
