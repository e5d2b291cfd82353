//! Error types for roomcast-cast
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Cache misses are not errors: they surface as `Option::None` from the cache.

use thiserror::Error;

/// Main error type for roomcast-cast
#[derive(Error, Debug)]
pub enum Error {
    /// Decoder or acquisition executable missing (fatal, not retryable)
    #[error("{tool} executable not found: {program}")]
    ExecutableNotFound {
        /// Role of the missing tool ("decoder" or "acquisition")
        tool: &'static str,
        /// Program name or path that failed to spawn
        program: String,
    },

    /// Sink socket connect timeout, refusal or mid-stream drop
    #[error("Connection failure to {addr}: {message}")]
    ConnectionFailure { addr: String, message: String },

    /// Child process exited abnormally before producing usable output
    #[error("{tool} process failed: {message}")]
    ProcessFailure { tool: &'static str, message: String },

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable cache database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Process or socket I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable error kind for API responses
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ExecutableNotFound { .. } => "executable_not_found",
            Error::ConnectionFailure { .. } => "connection_failure",
            Error::ProcessFailure { .. } => "process_failure",
            Error::Config(_) => "config",
            Error::Database(_) => "database",
            Error::Http(_) => "http",
            Error::InvalidState(_) => "invalid_state",
            Error::Io(_) => "io",
        }
    }
}

impl From<roomcast_common::Error> for Error {
    fn from(err: roomcast_common::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenience Result type using roomcast-cast Error
pub type Result<T> = std::result::Result<T, Error>;
