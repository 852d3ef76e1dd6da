//! Error types for hostfacts.
//!
//! This module provides the unified error taxonomy with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for schedulers deciding whether to retry a run
//!
//! Layer-specific errors (runner, query client, probe executor, config) are
//! lifted into [`Error`] at crate boundaries.
//!
//! # Machine-Facing Output
//!
//! Errors serialize to structured JSON:
//! ```json
//! {
//!   "code": 31,
//!   "category": "query",
//!   "message": "query execution failed: Error: no such table: mdm",
//!   "recoverable": true,
//!   "context": { "module": "management" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for hostfacts operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration loading and validation.
    Config,
    /// Subprocess launch and supervision.
    Process,
    /// Structured query engine failures.
    Query,
    /// Probe definition and fallback failures.
    Probe,
    /// Module and orchestration failures.
    Collection,
    /// File I/O and serialization.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Process => write!(f, "process"),
            ErrorCategory::Query => write!(f, "query"),
            ErrorCategory::Probe => write!(f, "probe"),
            ErrorCategory::Collection => write!(f, "collection"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for hostfacts.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    // Process errors (20-29)
    #[error("failed to launch {command}: {cause}")]
    LaunchFailed { command: String, cause: String },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    // Query errors (30-39)
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("invalid output: {0}")]
    InvalidOutput(String),

    #[error("output is not valid UTF-8: {0}")]
    DecodeFailed(String),

    // Probe errors (40-49)
    #[error("probe '{probe}' in module '{module}' has neither a query nor a shell script")]
    NoSourceAvailable { module: String, probe: String },

    // Collection errors (50-59)
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("module '{module}' failed: {message}")]
    ModuleFailed { module: String, message: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Process errors
    /// - 30-39: Query errors
    /// - 40-49: Probe errors
    /// - 50-59: Collection errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::LaunchFailed { .. } => 20,
            Error::Timeout { .. } => 21,
            Error::ExecutionFailed(_) => 30,
            Error::InvalidOutput(_) => 31,
            Error::DecodeFailed(_) => 32,
            Error::NoSourceAvailable { .. } => 40,
            Error::ModuleNotFound(_) => 50,
            Error::ModuleFailed { .. } => 51,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Config,
            Error::LaunchFailed { .. } | Error::Timeout { .. } => ErrorCategory::Process,
            Error::ExecutionFailed(_) | Error::InvalidOutput(_) | Error::DecodeFailed(_) => {
                ErrorCategory::Query
            }
            Error::NoSourceAvailable { .. } => ErrorCategory::Probe,
            Error::ModuleNotFound(_) | Error::ModuleFailed { .. } => ErrorCategory::Collection,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether a later collection run may succeed where this one failed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => false,
            Error::LaunchFailed { .. } => true, // binary may be installed later
            Error::Timeout { .. } => true,
            Error::ExecutionFailed(_) => true,
            Error::InvalidOutput(_) => true,
            Error::DecodeFailed(_) => true,
            Error::NoSourceAvailable { .. } => false, // programming defect
            Error::ModuleNotFound(_) => false,
            Error::ModuleFailed { .. } => true,
            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Additional structured context (e.g., module id, command).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::LaunchFailed { command, .. } => {
                context.insert("command".to_string(), serde_json::json!(command));
            }
            Error::Timeout { command, timeout } => {
                context.insert("command".to_string(), serde_json::json!(command));
                context.insert(
                    "timeout_ms".to_string(),
                    serde_json::json!(timeout.as_millis() as u64),
                );
            }
            Error::NoSourceAvailable { module, probe } => {
                context.insert("module".to_string(), serde_json::json!(module));
                context.insert("probe".to_string(), serde_json::json!(probe));
            }
            Error::ModuleNotFound(module) | Error::ModuleFailed { module, .. } => {
                context.insert("module".to_string(), serde_json::json!(module));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}
