//! Error types for the usenet store.

use std::path::PathBuf;

use nimbus_core::ErrorKind;
use thiserror::Error;

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A filesystem operation failed.
    #[error("store io failed on {path}")]
    Io {
        /// Path involved in the operation.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// A persisted document failed to encode or decode.
    #[error("store codec failed on {path}")]
    Codec {
        /// Path involved in the operation.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// The requested record does not exist.
    #[error("nzb '{id}' not found")]
    NotFound {
        /// Missing identifier.
        id: String,
    },
}

impl StoreError {
    /// Classify into the engine-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::Codec { .. } => ErrorKind::Connection,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}
