//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::executor::is_retryable_error;
use crate::runtime::RetryPolicy;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// HTTP transport settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Invocation executor settings.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Failure ledger settings.
    #[serde(default)]
    pub failure_log: FailureLogConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.keepalive_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "server.keepalive_secs must be at least 1".to_string(),
            });
        }
        let decay = self.failure_log.decay_base;
        if !(decay > 0.0 && decay <= 1.0) {
            return Err(ConfigError::ValidationError {
                message: format!("failure_log.decay_base must be in (0, 1], got {decay}"),
            });
        }
        if self.executor.max_attempts == 0 {
            return Err(ConfigError::ValidationError {
                message: "executor.max_attempts must be at least 1".to_string(),
            });
        }
        if self.executor.base_delay_ms > self.executor.max_delay_ms {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "executor.base_delay_ms ({}) exceeds executor.max_delay_ms ({})",
                    self.executor.base_delay_ms, self.executor.max_delay_ms
                ),
            });
        }
        if !(0.0..1.0).contains(&self.executor.jitter) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "executor.jitter must be in [0, 1), got {}",
                    self.executor.jitter
                ),
            });
        }
        if self.executor.worker_threads == 0 {
            return Err(ConfigError::ValidationError {
                message: "executor.worker_threads must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between keep-alive pings on a push session.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl ServerConfig {
    /// Keep-alive interval as a [`Duration`].
    #[must_use]
    pub const fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    9090
}

const fn default_keepalive_secs() -> u64 {
    15
}

/// Invocation executor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Total attempts per call, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any backoff, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter fraction applied to each backoff.
    #[serde(default)]
    pub jitter: f64,

    /// Size of the blocking pool used for synchronous tools.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

impl ExecutorConfig {
    /// Builds the retry policy described by this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts.saturating_sub(1))
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(self.jitter)
            .retry_if(is_retryable_error)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: 0.0,
            worker_threads: default_worker_threads(),
        }
    }
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    4000
}

const fn default_max_delay_ms() -> u64 {
    10_000
}

const fn default_worker_threads() -> usize {
    8
}

/// Failure ledger configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailureLogConfig {
    /// Where to persist failure records. In-memory only when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Per-second decay base for failure scores.
    #[serde(default = "default_decay_base")]
    pub decay_base: f64,

    /// How many recent failure timestamps to keep per tool.
    #[serde(default = "default_max_recent")]
    pub max_recent: usize,
}

impl Default for FailureLogConfig {
    fn default() -> Self {
        Self {
            path: None,
            decay_base: default_decay_base(),
            max_recent: default_max_recent(),
        }
    }
}

const fn default_decay_base() -> f64 {
    0.9
}

const fn default_max_recent() -> usize {
    20
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
