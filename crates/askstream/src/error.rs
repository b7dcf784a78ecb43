//! Error types for askstream

use thiserror::Error;

use crate::history::HistoryError;

/// Main error type for askstream process-level operations
#[derive(Error, Debug)]
pub enum AskStreamError {
    /// Storage-related errors (LanceDB, file system, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors, including a missing upstream credential
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors (bind, serve)
    #[error("Server error: {0}")]
    Server(String),

    /// History sink errors surfaced outside the request path
    #[error(transparent)]
    History(#[from] HistoryError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for askstream operations
pub type Result<T> = std::result::Result<T, AskStreamError>;
