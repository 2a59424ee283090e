//! Core error type shared across the PTS workspace.

use thiserror::Error;

/// Cross-cutting error for code that doesn't own a more specific taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// Generic error with a human-readable message.
    #[error("{0}")]
    Generic(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
