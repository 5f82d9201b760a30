//! Error types for scanpilot

use thiserror::Error;

/// Result type alias for scanpilot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the application
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Other(String),
}

impl Error {
    /// Process exit code for a failed run.
    ///
    /// Argument errors exit 1 before an `Error` is ever constructed;
    /// everything past argument parsing maps here: a malformed target is 2,
    /// output file setup is 3, any other startup or platform failure is 4.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Target(_) => 2,
            Error::Io(_) => 3,
            _ => 4,
        }
    }
}

/// Seed URL resolution errors
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("Cannot parse '{input}' as a URL: {reason}")]
    Malformed { input: String, reason: String },

    #[error("URL '{0}' has no host")]
    MissingHost(String),

    #[error("No default port known for scheme '{0}'; specify one explicitly")]
    UnknownScheme(String),
}

/// Errors surfaced by the security-testing platform
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Platform authentication failed. Check the configured API key.")]
    Unauthorized,

    #[error("Platform rejected the request: {0}")]
    BadRequest(String),

    #[error("Platform error: {0}")]
    ServerError(String),

    #[error("Network error talking to the platform: {0}")]
    Network(String),

    #[error("Invalid platform response: {0}")]
    InvalidResponse(String),

    #[error("Unknown scan job '{0}'")]
    UnknownJob(String),

    #[error("Session restore from '{path}' failed: {reason}")]
    RestoreFailed { path: String, reason: String },

    #[error("Session save to '{path}' failed: {reason}")]
    SaveFailed { path: String, reason: String },
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlatformError::Network("Request timed out".to_string())
        } else if err.is_connect() {
            PlatformError::Network("Failed to connect to the platform".to_string())
        } else {
            PlatformError::Network(err.to_string())
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
