//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid file state: {0}")]
    InvalidState(String),

    #[error("invalid file descriptor: {0}")]
    InvalidDescriptor(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
