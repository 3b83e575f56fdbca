//! Error types for the Gatekeeper admission layer.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
///
/// A denied request is not an error: it is reported through
/// [`RateLimitResult::allowed`](crate::ratelimit::RateLimitResult::allowed).
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Invalid limit or window supplied to a check
    #[error("Invalid policy: {0}")]
    Policy(String),

    /// A key could not be derived from the request context
    #[error("Key extraction failed: {0}")]
    KeyExtraction(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure raised by a protected handler
    #[error("Handler error: {0}")]
    Handler(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GatekeeperError {
    fn from(err: config::ConfigError) -> Self {
        GatekeeperError::Config(err.to_string())
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
