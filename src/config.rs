//! Configuration using Figment
//!
//! Settings are loaded from (in order of precedence, highest last):
//! 1. Built-in defaults
//! 2. TOML configuration file (default: `serial_session.toml`, optional)
//! 3. Environment variables prefixed with `SERIAL_SESSION_`, nested keys
//!    separated by a double underscore
//!
//! ```text
//! SERIAL_SESSION_LOGGING__LEVEL=debug
//! SERIAL_SESSION_TRANSFER__READ_TIMEOUT_MS=500
//! ```
//!
//! Line framing (8 data bits, 1 stop bit, no parity) is fixed and has no
//! configuration key. Only the ambient behavior is configurable: logging and
//! the wait bound the status entry points apply to transfers.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::Wait;

/// Default configuration file, looked up relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "serial_session.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SERIAL_SESSION_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Wait bounds applied by the status entry points
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// Per-direction wait bounds. `None` keeps the block-until-complete behavior.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Read wait bound in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
    /// Write wait bound in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_timeout_ms: Option<u64>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl TransferConfig {
    /// Wait applied to reads issued through the registry.
    pub fn read_wait(&self) -> Wait {
        wait_for(self.read_timeout_ms)
    }

    /// Wait applied to writes issued through the registry.
    pub fn write_wait(&self) -> Wait {
        wait_for(self.write_timeout_ms)
    }
}

fn wait_for(timeout_ms: Option<u64>) -> Wait {
    match timeout_ms {
        Some(ms) => Wait::timeout(Duration::from_millis(ms)),
        None => Wait::forever(),
    }
}

impl Settings {
    /// Load from `serial_session.toml` (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file path. A missing file is not an error;
    /// defaults and environment overrides still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Load the default sources, falling back to built-in defaults when the
    /// sources are unreadable or invalid.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring serial session configuration");
                Self::default()
            }
        }
    }

    /// Checks:
    /// - Log level is one of trace, debug, info, warn, error
    /// - Configured timeouts are non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            )));
        }

        for (key, value) in [
            ("read_timeout_ms", self.transfer.read_timeout_ms),
            ("write_timeout_ms", self.transfer.write_timeout_ms),
        ] {
            if value == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "transfer.{} must be > 0 (omit it to wait indefinitely)",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Render the effective settings as TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_wait_forever() {
        let settings = Settings::default();
        assert_eq!(settings.logging.level, "info");
        assert!(settings.transfer.read_wait().timeout_value().is_none());
        assert!(settings.transfer.write_wait().timeout_value().is_none());
        settings.validate().expect("defaults must validate");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[logging]\nlevel = \"debug\"\n\n[transfer]\nread_timeout_ms = 250"
        )
        .expect("write config");

        let settings = Settings::load_from(file.path()).expect("load settings");
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(
            settings.transfer.read_wait().timeout_value(),
            Some(Duration::from_millis(250))
        );
        assert!(settings.transfer.write_wait().timeout_value().is_none());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings = Settings::load_from(dir.path().join("absent.toml")).expect("load");
        assert_eq!(settings.logging, LoggingConfig::default());
    }

    #[test]
    fn test_rejects_invalid_level() {
        let mut settings = Settings::default();
        settings.logging.level = "loud".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log level 'loud'"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut settings = Settings::default();
        settings.transfer.write_timeout_ms = Some(0);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("transfer.write_timeout_ms"));
    }

    #[test]
    fn test_toml_round_trip_of_effective_settings() {
        let mut settings = Settings::default();
        settings.transfer.read_timeout_ms = Some(100);
        let rendered = settings.to_toml_string().expect("render");
        assert!(rendered.contains("read_timeout_ms = 100"));
        assert!(!rendered.contains("write_timeout_ms"));
    }
}
