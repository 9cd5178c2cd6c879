//! Error types for toolrelay.
//!
//! # Security Note
//!
//! Error messages never include raw tool arguments. Anything that needs to
//! surface arguments (protocol error data, audit records) carries the masked
//! form produced by [`crate::executor::mask_arguments`].

use std::path::PathBuf;

use serde_json::{json, Value};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors raised while registering or removing catalog entries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// A tool or pipeline with this name already exists.
    #[error("'{name}' is already registered")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },

    /// No tool or pipeline with this name exists.
    #[error("'{name}' is not registered")]
    NotFound {
        /// The missing name.
        name: String,
    },
}

/// An expected, typed failure raised by a tool (for example bad input).
///
/// `kind` is machine-readable and becomes the JSON-RPC error message;
/// `message` is human-readable; `data` is an optional structured payload.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct ToolError {
    /// Machine-readable error type, e.g. `bad_request`.
    pub kind: String,
    /// Human-readable description.
    pub message: String,
    /// Extra structured details.
    pub data: Option<Value>,
}

impl ToolError {
    /// Creates a tool error without extra data.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The outcome of a failed tool resolution or call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvokeError {
    /// The tool reported a typed failure.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// No tool or pipeline is registered under this name.
    #[error("no tool or pipeline named '{0}'")]
    NotFound(String),

    /// Any other failure (panics, join errors, unexpected conditions).
    #[error("internal error: {0}")]
    Internal(String),
}

impl InvokeError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the executor's default retry predicate retries this error.
    ///
    /// Resolution failures are deterministic and never retried; everything
    /// raised by the tool itself is.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound(_))
    }
}

/// A failed invocation together with its masked, loggable context.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error}")]
pub struct InvocationFailure {
    /// The underlying failure.
    #[source]
    pub error: InvokeError,
    /// Arguments with sensitive keys masked.
    pub arguments: Value,
    /// Audit record for the call.
    pub audit: Value,
}

impl InvocationFailure {
    /// Builds the `data` object attached to a JSON-RPC error response.
    #[must_use]
    pub fn error_data(&self) -> Value {
        match &self.error {
            InvokeError::Tool(tool) => json!({
                "message": tool.message,
                "details": tool.data,
                "arguments": self.arguments,
                "audit": self.audit,
            }),
            InvokeError::NotFound(_) | InvokeError::Internal(_) => json!({
                "arguments": self.arguments,
                "audit": self.audit,
            }),
        }
    }
}

/// Errors raised when pushing to a push-transport session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No active session has this id.
    #[error("session '{0}' not found")]
    NotFound(String),

    /// The session's channel is gone; the session has been removed.
    #[error("session '{0}' is closed")]
    Closed(String),
}

/// Errors raised by the failure ledger's persistence layer.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The ledger file could not be read or written.
    #[error("failure ledger I/O error at {path}")]
    Io {
        /// The ledger file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The ledger file is not valid JSON.
    #[error("failure ledger at {path} is corrupt")]
    Corrupt {
        /// The ledger file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}
