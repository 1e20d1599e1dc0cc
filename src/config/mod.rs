//! Configuration module
//!
//! Handles the TOML settings file

mod settings;

pub use settings::{AppConfig, ConfigError, LoggingConfig, SerialSettings};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Settings file name inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "powershield", "PowerShield")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "powershield", "PowerShield")
        .map(|dirs| dirs.data_dir().join("logs"))
}

/// Default settings file location
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}
