//! Error types for the joiner daemon.

use std::fmt;

/// Convenience alias for `Result<T, JoinerError>`.
pub type Result<T> = std::result::Result<T, JoinerError>;

/// Errors that can occur in the joiner daemon.
#[derive(Debug)]
pub enum JoinerError {
    /// Configuration error (invalid TOML, missing fields, etc.).
    Config(String),
    /// Store connectivity or transaction error.
    Store(String),
    /// Queue connection or subscription error.
    Queue(String),
    /// Generator registry construction error.
    Generators(String),
}

impl fmt::Display for JoinerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinerError::Config(msg) => write!(f, "config error: {msg}"),
            JoinerError::Store(msg) => write!(f, "store error: {msg}"),
            JoinerError::Queue(msg) => write!(f, "queue error: {msg}"),
            JoinerError::Generators(msg) => write!(f, "generator error: {msg}"),
        }
    }
}

impl std::error::Error for JoinerError {}
