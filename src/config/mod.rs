//! Configuration file loading and parsing.
//!
//! This module handles loading the configuration file from disk and parsing
//! it into validated, type-safe structures.
//!
//! # Configuration File Locations
//!
//! The configuration file is searched in the following order:
//!
//! 1. Path given as the `CONFIG_FILE` CLI argument (must exist)
//! 2. Default location (defaults are used if it does not exist):
//!    - **Linux/macOS:** `~/.toolrelay/config.json`
//!    - **Windows:** `%USERPROFILE%\.toolrelay\config.json`
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "server": { "host": "127.0.0.1", "port": 9090, "keepalive_secs": 15 },
//!   "executor": { "max_attempts": 3, "base_delay_ms": 4000, "max_delay_ms": 10000 },
//!   "failure_log": { "path": "/var/lib/toolrelay/failures.json", "decay_base": 0.9 },
//!   "logging": { "level": "info" }
//! }
//! ```

mod settings;

pub use settings::{Config, ExecutorConfig, FailureLogConfig, LoggingConfig, ServerConfig};

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.toolrelay/`
/// - **Windows:** `%USERPROFILE%\.toolrelay\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".toolrelay"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.json"))
}

/// Loads and parses the configuration file.
///
/// If `path` is `None`, uses the platform-specific default location and
/// falls back to [`Config::default`] when that file does not exist.
///
/// # Errors
///
/// Returns an error if:
/// - An explicit `path` does not exist
/// - The file cannot be read
/// - The JSON is malformed
/// - Fields are unknown or invalid
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::NotFound {
                    path: p.to_path_buf(),
                });
            }
            p.to_path_buf()
        }
        None => match default_config_path().filter(|p| p.exists()) {
            Some(p) => p,
            None => {
                tracing::debug!("No configuration file, using defaults");
                return Ok(Config::default());
            }
        },
    };

    let contents = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: config_path.clone(),
        source: e,
    })?;

    config.validate()?;
    tracing::debug!(path = %config_path.display(), "Loaded configuration");

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_path_exists() {
        let path = default_config_path();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.to_string_lossy().contains(".toolrelay"));
        assert!(path.to_string_lossy().ends_with("config.json"));
    }

    #[test]
    fn explicit_missing_path_is_error() {
        let dir = TempDir::new().unwrap();
        let err = load_config(Some(&dir.path().join("absent.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn loads_and_validates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server": {"port": 8123}, "logging": {"level": "debug"}}"#)
            .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 8123);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.executor.max_attempts, 3);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"failure_log": {"decay_base": 1.5}}"#).unwrap();
        assert!(matches!(
            load_config(Some(&path)).unwrap_err(),
            ConfigError::ValidationError { .. }
        ));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_config(Some(&path)).unwrap_err(),
            ConfigError::ParseError { .. }
        ));
    }
}
