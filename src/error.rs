//! Error types and error classification for the chat client
//!
//! Every failure that crosses a module boundary ends up as an [`AppError`],
//! which always belongs to exactly one [`ErrorKind`]. Callers decide how to
//! react (surface, log, retry) from the kind alone.

use crate::chat::validation::ValidationError;
use crate::storage::StorageError;
use thiserror::Error;

/// The closed set of error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad user input: empty or over-length text, malformed identity
    Validation,
    /// Namespace read/write/remove failure, including quota exhaustion
    Storage,
    /// Transport failure (no real transport exists yet)
    Network,
    /// Anything uncategorized
    Unknown,
}

impl ErrorKind {
    /// Get the category name as used in diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Storage => "STORAGE",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// User input was rejected
    #[error("Validation error: {0}")]
    Validation(String),

    /// The storage namespace could not be read or written
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Message transport failed
    #[error("Network error: {0}")]
    Network(String),

    /// Catch-all for unexpected errors
    #[error("Unexpected error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.0)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Unknown(err.into())
    }
}

impl AppError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Storage(_) => ErrorKind::Storage,
            AppError::Network(_) => ErrorKind::Network,
            AppError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether retrying the same operation could succeed
    ///
    /// Only transport failures are transient; everything else needs the
    /// caller to change something first.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Network
    }
}
