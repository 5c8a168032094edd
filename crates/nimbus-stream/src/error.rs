//! Error types for the streaming engine.

use nimbus_core::ErrorKind;
use nimbus_nntp::NntpError;
use nimbus_rar::RarError;
use thiserror::Error;

/// Convenience alias for streaming results.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors raised while streaming a byte range.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The requested range is not satisfiable.
    #[error("invalid range {start}-{end}")]
    InvalidRange {
        /// Requested first byte.
        start: u64,
        /// Requested last byte.
        end: u64,
    },
    /// A segment download exhausted its retries.
    #[error("segment {message_id} failed")]
    Segment {
        /// Message-id of the failing segment.
        message_id: String,
        /// Final transport error.
        #[source]
        source: NntpError,
    },
    /// The archive walk failed.
    #[error("rar extraction failed")]
    Rar {
        /// Underlying reader error.
        #[source]
        source: RarError,
    },
    /// No archive entry matched the target file.
    #[error("archive entry '{name}' not found")]
    EntryNotFound {
        /// Name that was searched for.
        name: String,
    },
    /// The piped archive ended before the requested range was produced.
    #[error("stream truncated")]
    Truncated,
    /// Writing to the sink failed; usually the client went away.
    #[error("sink write failed")]
    Sink {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl StreamError {
    /// Classify into the engine-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRange { .. } => ErrorKind::InvalidRange,
            Self::Segment { source, .. } => source.kind(),
            Self::Rar { source } => source.kind(),
            Self::EntryNotFound { .. } => ErrorKind::NotFound,
            Self::Truncated => ErrorKind::Truncated,
            Self::Sink { .. } => ErrorKind::Connection,
        }
    }

    /// Whether the failure indicates the HTTP client went away rather than
    /// an upstream problem.
    #[must_use]
    pub fn is_client_disconnect(&self) -> bool {
        match self {
            Self::Sink { source } => matches!(
                source.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
