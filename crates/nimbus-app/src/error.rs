//! # Design
//!
//! - Centralize application-level errors for bootstrap and serving.
//! - Keep error messages constant while carrying context fields.
//! - Preserve source errors without re-logging at call sites.

use std::net::SocketAddr;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration loading or validation failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        #[source]
        source: nimbus_config::ConfigError,
    },
    /// No NNTP provider could be initialised.
    #[error("nntp initialisation failed")]
    Nntp {
        /// Source transport error.
        #[source]
        source: nimbus_nntp::NntpError,
    },
    /// Telemetry setup failed.
    #[error("telemetry setup failed")]
    Telemetry {
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
    /// Binding the WebDAV listener failed.
    #[error("failed to bind webdav listener")]
    Bind {
        /// Address attempted.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Serving failed after startup.
    #[error("webdav server terminated unexpectedly")]
    Serve {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: nimbus_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }
}
