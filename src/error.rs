// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the forwarder.
//!
//! Errors are split by how far they are allowed to travel. Fatal errors end
//! the run (the coordinator cleans up and the process exits non-zero).
//! Contained errors are logged against a single event and the loop moves on.
//!
//! # Error Categories
//!
//! | Error Type | Fatal | Description |
//! |------------|-------|-------------|
//! | `Config` | Yes | Missing source URI, no targets, bad values |
//! | `Connection` | Yes | Source or target unreachable at startup |
//! | `Mongo` | Depends | Driver error, classified by the caller |
//! | `Stream` | Yes | Change stream broke or the resume token was rejected |
//! | `InvalidState` | Yes | Coordinator state machine violation |
//! | `Checkpoint` | No | Cursor could not be persisted after an event |
//! | `MalformedEvent` | No | Event lacks the fields its operation needs |
//! | `Write` | No | A single target rejected a write |
//! | `Shutdown` | No | Pull on a closed watcher |
//! | `Internal` | No | Unexpected internal error |
//!
//! Use [`ForwarderError::is_fatal()`] to decide whether an error ends the run.

use thiserror::Error;

/// Result type alias for forwarder operations.
pub type Result<T> = std::result::Result<T, ForwarderError>;

/// Errors that can occur while forwarding change events.
#[derive(Error, Debug)]
pub enum ForwarderError {
    /// Invalid or missing configuration.
    ///
    /// Reported before any connection is attempted.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An endpoint could not be reached during startup.
    #[error("Connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },

    /// MongoDB driver error.
    ///
    /// Carries the operation that failed so logs say more than "command failed".
    #[error("MongoDB error ({operation}): {message}")]
    Mongo {
        operation: String,
        message: String,
        #[source]
        source: Option<mongodb::error::Error>,
    },

    /// The change stream broke or refused to resume.
    ///
    /// Never retried inside the watcher.
    #[error("Change stream error: {0}")]
    Stream(String),

    /// Persisting or loading the resume cursor failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// A change event is missing a field its operation requires.
    #[error("Malformed change event: {0}")]
    MalformedEvent(String),

    /// A single target rejected or failed a write.
    #[error("Write to target {target} failed: {message}")]
    Write { target: String, message: String },

    /// Coordinator state machine violation
    /// (e.g. calling `start()` twice).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The watcher was closed while a pull was in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Catch-all for errors that shouldn't happen.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ForwarderError {
    /// Create a MongoDB error from a driver error.
    pub fn mongo(operation: impl Into<String>, source: mongodb::error::Error) -> Self {
        Self::Mongo {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a MongoDB error without a source.
    pub fn mongo_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mongo {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error must end the run.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Connection { .. } => true,
            Self::Stream(_) => true,
            Self::InvalidState { .. } => true,
            Self::Mongo { .. } => false, // The caller wraps it as Stream/Connection when fatal
            Self::Checkpoint(_) => false,
            Self::MalformedEvent(_) => false,
            Self::Write { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }
}

impl From<mongodb::error::Error> for ForwarderError {
    fn from(e: mongodb::error::Error) -> Self {
        Self::mongo("unknown", e)
    }
}
