//! Error types for configuration and manifest loading.

use thiserror::Error;

use crate::ValidationError;

/// Errors that can occur while loading or saving configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// The file parsed but describes an invalid configuration.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationError),
}

/// Convenience alias for results with [`ConfigError`].
pub type Result<T> = std::result::Result<T, ConfigError>;
