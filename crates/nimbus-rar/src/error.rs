//! Error types for the streaming RAR reader.

use nimbus_core::ErrorKind;
use thiserror::Error;

/// Convenience alias for reader results.
pub type RarResult<T> = Result<T, RarError>;

/// Errors raised while walking an archive.
#[derive(Debug, Error)]
pub enum RarError {
    /// The stream does not begin with a RAR4 or RAR5 signature.
    #[error("not a RAR archive")]
    InvalidSignature,
    /// The archive headers are encrypted and cannot be walked.
    #[error("archive headers are encrypted")]
    Encrypted,
    /// A header field was structurally invalid.
    #[error("malformed archive: {detail}")]
    Malformed {
        /// What was malformed.
        detail: String,
    },
    /// The stream ended before the expected data was produced.
    #[error("archive truncated")]
    Truncated,
    /// Reading from the underlying stream failed.
    #[error("archive read failed")]
    Io {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl RarError {
    /// Classify into the engine-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSignature | Self::Encrypted | Self::Malformed { .. } => {
                ErrorKind::InvalidArchive
            }
            Self::Truncated => ErrorKind::Truncated,
            Self::Io { .. } => ErrorKind::Connection,
        }
    }
}

impl From<std::io::Error> for RarError {
    fn from(source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io { source }
        }
    }
}
