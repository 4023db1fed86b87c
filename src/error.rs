//! Error types for SentinelFS

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by SentinelFS
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A referenced path does not exist
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// A path expected to be a directory is not one
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Configuration file could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration contents failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Catch-all for internal failures
    #[error("internal error: {0}")]
    Internal(String),
}
