//! Error types for configuration loading and validation.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating the configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file")]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid YAML for the expected model.
    #[error("failed to parse configuration document")]
    Parse {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying deserialisation error.
        #[source]
        source: serde_yaml::Error,
    },
    /// A semantic constraint was violated.
    #[error("invalid configuration: {detail}")]
    Invalid {
        /// Human-readable description of the violated constraint.
        detail: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(detail: impl Into<String>) -> Self {
        Self::Invalid {
            detail: detail.into(),
        }
    }
}
