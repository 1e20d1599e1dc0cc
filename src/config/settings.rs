//! Application settings

use crate::core::protocol::AcquisitionConfig;
use crate::core::session::EngineSettings;
use crate::core::transport::SerialConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Settings file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading or writing the file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid settings TOML
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings could not be rendered
    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial port settings
    pub serial: SerialSettings,
    /// Engine tuning
    pub engine: EngineSettings,
    /// Acquisition defaults
    pub acquisition: AcquisitionConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from the default location, falling back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(io_error)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Serial port settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port name (e.g., COM3, /dev/ttyACM0)
    pub port: Option<String>,
    /// How long a read waits for the first byte
    pub read_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            read_timeout_ms: 10,
        }
    }
}

impl SerialSettings {
    /// Serial transport config for `port`, or the configured one
    pub fn serial_config(&self, port: Option<&str>) -> Option<SerialConfig> {
        let port = port.or(self.port.as_deref())?;
        Some(SerialConfig::new(port).read_timeout(self.read_timeout_ms))
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive
    pub level: String,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{AcqTime, DataFormat};

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.serial.port = Some("/dev/ttyACM0".to_string());
        config.engine.response_timeout_ms = 250;
        config.acquisition.format = DataFormat::Binary;
        config.acquisition.frequency_hz = 50_000;
        config.acquisition.acq_time = AcqTime::Infinite;
        config.acquisition.current_threshold_ua = Some(5_000);
        config.logging.file = Some(dir.path().join("powershield.log"));

        config.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\ntimeout_escalation = 3\n\n[acquisition]\nfrequency_hz = 1000\n").unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.engine.timeout_escalation, 3);
        assert_eq!(loaded.engine.baud_rate, 3_686_400);
        assert_eq!(loaded.acquisition.frequency_hz, 1000);
        assert_eq!(loaded.acquisition.voltage_mv, 3300);
        assert_eq!(loaded.logging.level, "info");
    }

    #[test]
    fn test_invalid_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine\n").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::Parse(_))));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(AppConfig::load_from(&missing), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_serial_config_prefers_explicit_port() {
        let settings = SerialSettings {
            port: Some("COM3".to_string()),
            read_timeout_ms: 20,
        };
        let config = settings.serial_config(Some("COM9")).unwrap();
        assert_eq!(config.port, "COM9");
        assert_eq!(config.read_timeout_ms, 20);
        assert_eq!(settings.serial_config(None).unwrap().port, "COM3");
        assert!(SerialSettings::default().serial_config(None).is_none());
    }
}
