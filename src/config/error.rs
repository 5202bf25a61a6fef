//! Configuration Error Types
//!
//! Specific, actionable error messages for configuration loading, validation and
//! peer-list parsing.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Configuration file not found at the given location
    #[error("Configuration file not found: {path}")]
    ConfigFileNotFound { path: PathBuf },

    /// The `config` crate could not build or deserialize the configuration
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A field is present but its value is unusable
    #[error("Invalid value for {field}: '{value}' ({context})")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Collaboration host and port lists differ in length
    #[error("The number of collaboration hostnames ({hosts}) and ports ({ports}) must be equal")]
    PeerListMismatch { hosts: usize, ports: usize },

    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

impl ConfigurationError {
    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    pub fn validation_error<E: std::fmt::Display>(error: E) -> Self {
        Self::Validation(error.to_string())
    }
}
