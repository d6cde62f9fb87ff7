//! Error types for render-guard.
//!
//! Only configuration and startup paths return these. Admission checks on the
//! request path never fail; they degrade to a fallback identity or a denial.

use thiserror::Error;

/// Main error type for render-guard operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy failed validation at load time
    #[error("Invalid policy for endpoint '{endpoint}': {reason}")]
    InvalidPolicy { endpoint: String, reason: String },

    /// The same endpoint class was declared twice in one policy source
    #[error("Duplicate policy for endpoint '{0}'")]
    DuplicatePolicy(String),

    /// A route asked for an endpoint class with no configured policy
    #[error("No rate limit policy configured for endpoint '{0}'")]
    UnknownEndpoint(String),

    /// Layered settings could not be assembled
    #[error("Settings error: {0}")]
    Settings(#[from] ::config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for render-guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
