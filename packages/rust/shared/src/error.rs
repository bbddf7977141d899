//! Error types for phishlens.
//!
//! Library crates use [`PhishLensError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-URL enrichment failures (upstream status codes, poll timeouts) are not
//! errors at this level: they surface as an `Unavailable` lookup outcome so a
//! batch keeps going. Variants here are for faults that stop a stage.

use std::path::PathBuf;

/// Top-level error type for all phishlens operations.
#[derive(Debug, thiserror::Error)]
pub enum PhishLensError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// No API key configured for a reputation service.
    #[error("no API key for {service}: set the {env_var} environment variable")]
    MissingCredential { service: String, env_var: String },

    /// Transport-level HTTP failure (connect, TLS, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// Cache directory or cache entry error.
    #[error("cache error: {0}")]
    Cache(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error (missing column, bad argument, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// CSV artifact read/write error.
    #[error("artifact error: {0}")]
    Artifact(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PhishLensError>;

impl PhishLensError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Missing or empty API key environment variable.
    pub fn missing_credential(service: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self::MissingCredential {
            service: service.into(),
            env_var: env_var.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PhishLensError::config("unknown section");
        assert_eq!(err.to_string(), "config error: unknown section");

        let err = PhishLensError::missing_credential("reputation", "VT_API_KEY");
        assert!(err.to_string().contains("VT_API_KEY"));
    }
}
