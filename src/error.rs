//! Error types for the Tollgate admission layer.

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// Only startup can fail. Once the tiers are built, every admission check
/// returns a [`Decision`](crate::gate::Decision) rather than an error.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tier's limiter parameters are out of range
    #[error("Invalid policy for tier '{tier}': {reason}")]
    InvalidPolicy { tier: String, reason: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TollgateError {
    pub(crate) fn invalid_policy(tier: impl Into<String>, reason: impl Into<String>) -> Self {
        TollgateError::InvalidPolicy {
            tier: tier.into(),
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for TollgateError {
    fn from(err: config::ConfigError) -> Self {
        TollgateError::Config(err.to_string())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
