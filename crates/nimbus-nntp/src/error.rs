//! Error types for the NNTP transport.

use nimbus_core::ErrorKind;
use thiserror::Error;

/// Convenience alias for NNTP results.
pub type NntpResult<T> = Result<T, NntpError>;

/// Errors raised by connections, pools, and the failover client.
#[derive(Debug, Error)]
pub enum NntpError {
    /// TCP or TLS level failure.
    #[error("connection failure during {operation}")]
    Io {
        /// Operation being performed when the stream failed.
        operation: &'static str,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// A deadline expired before the operation completed.
    #[error("timed out during {operation}")]
    Timeout {
        /// Operation that exceeded its deadline.
        operation: &'static str,
    },
    /// The server answered a command with an unexpected status code.
    #[error("{command} answered {code} {message}")]
    UnexpectedStatus {
        /// Command that was issued.
        command: &'static str,
        /// Status code returned by the server.
        code: u16,
        /// Status message returned by the server.
        message: String,
        /// Taxonomy classification of the code.
        kind: ErrorKind,
    },
    /// Authentication was rejected.
    #[error("authentication rejected: {code} {message}")]
    Auth {
        /// Status code returned by the server.
        code: u16,
        /// Status message returned by the server.
        message: String,
    },
    /// The response violated the protocol framing.
    #[error("protocol violation: {detail}")]
    Protocol {
        /// What was malformed.
        detail: String,
    },
    /// A message-id failed normalisation.
    #[error("invalid message-id '{id}'")]
    InvalidMessageId {
        /// The offending identifier.
        id: String,
    },
    /// The article body failed yEnc decoding.
    #[error("yEnc decode failed")]
    Yenc {
        /// Underlying decoder error.
        #[source]
        source: crate::yenc::YencError,
    },
    /// Every pool was exhausted or busy.
    #[error("no NNTP connection available")]
    NoAvailableConnection,
    /// The pool was closed while the operation was waiting.
    #[error("pool is closed")]
    PoolClosed,
}

impl NntpError {
    /// Classify this error into the engine-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::PoolClosed => ErrorKind::Connection,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::UnexpectedStatus { kind, .. } => *kind,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::Protocol { .. } | Self::InvalidMessageId { .. } => ErrorKind::Protocol,
            Self::Yenc { .. } => ErrorKind::YencDecode,
            Self::NoAvailableConnection => ErrorKind::NoAvailableConnection,
        }
    }

    /// Whether the failed operation may be retried on another connection.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        self.kind().retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_carry_their_classification() {
        let err = NntpError::UnexpectedStatus {
            command: "BODY",
            code: 430,
            message: "no such article".into(),
            kind: ErrorKind::from_nntp_code(430),
        };
        assert_eq!(err.kind(), ErrorKind::ArticleNotFound);
        assert!(!err.retryable());

        let busy = NntpError::UnexpectedStatus {
            command: "GROUP",
            code: 400,
            message: "try later".into(),
            kind: ErrorKind::from_nntp_code(400),
        };
        assert_eq!(busy.kind(), ErrorKind::ServerBusy);
        assert!(busy.retryable());
    }

    #[test]
    fn pool_exhaustion_is_retryable() {
        assert!(NntpError::NoAvailableConnection.retryable());
        assert!(
            NntpError::Timeout {
                operation: "checkout"
            }
            .retryable()
        );
    }
}
