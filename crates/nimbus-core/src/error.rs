//! Engine-wide error taxonomy.
//!
//! Every crate in the workspace wraps its failures in a crate-local error
//! type that exposes `kind()` returning one of these variants, so retry
//! loops and the WebDAV status mapping can treat failures uniformly without
//! downcasting.

use serde::{Deserialize, Serialize};

/// Classified failure category shared across the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// TCP/TLS dial or read/write failure on an open stream.
    Connection,
    /// Deadline expired on a checkout or download.
    Timeout,
    /// Credentials were rejected (NNTP 481/482, debrid 401).
    Auth,
    /// NNTP 430/423: the article is gone or was never posted.
    ArticleNotFound,
    /// NNTP 411: the newsgroup does not exist on this provider.
    GroupNotFound,
    /// NNTP 502/503, or a write attempted against the read-only filesystem.
    Permission,
    /// NNTP 400: transient server overload.
    ServerBusy,
    /// NNTP 500/501: the server did not recognise the command.
    InvalidCommand,
    /// Unexpected status line or malformed response framing.
    Protocol,
    /// Malformed yEnc body or header.
    YencDecode,
    /// Debrid hoster rejected the link; triggers a re-insert.
    HosterUnavailable,
    /// Debrid account exhausted its traffic allowance.
    TrafficExceeded,
    /// Pool exhausted or every provider busy.
    NoAvailableConnection,
    /// NZB content failed to parse into any usable file.
    InvalidNzb,
    /// Requested byte range is not satisfiable.
    InvalidRange,
    /// RAR volume could not be read (bad password, corrupt headers).
    InvalidArchive,
    /// Archive ended before the requested range was produced.
    Truncated,
    /// Torrent, file, or archive entry does not exist.
    NotFound,
}

impl ErrorKind {
    /// Whether an operation failing with this kind may be retried.
    #[must_use]
    pub const fn retryable(self) -> bool {
        matches!(
            self,
            Self::Connection
                | Self::Timeout
                | Self::ServerBusy
                | Self::HosterUnavailable
                | Self::NoAvailableConnection
        )
    }

    /// Stable machine-readable label, used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Auth => "auth",
            Self::ArticleNotFound => "article_not_found",
            Self::GroupNotFound => "group_not_found",
            Self::Permission => "permission",
            Self::ServerBusy => "server_busy",
            Self::InvalidCommand => "invalid_command",
            Self::Protocol => "protocol",
            Self::YencDecode => "yenc_decode",
            Self::HosterUnavailable => "hoster_unavailable",
            Self::TrafficExceeded => "traffic_exceeded",
            Self::NoAvailableConnection => "no_available_connection",
            Self::InvalidNzb => "invalid_nzb",
            Self::InvalidRange => "invalid_range",
            Self::InvalidArchive => "invalid_archive",
            Self::Truncated => "truncated",
            Self::NotFound => "not_found",
        }
    }

    /// Classify an NNTP response code into a failure kind.
    ///
    /// Codes below 400 are successes and therefore map to `Protocol`: a
    /// caller only classifies a code after deciding it was not the expected
    /// success for the command it issued.
    #[must_use]
    pub const fn from_nntp_code(code: u16) -> Self {
        match code {
            430 | 423 => Self::ArticleNotFound,
            411 => Self::GroupNotFound,
            502 | 503 => Self::Permission,
            481 | 482 => Self::Auth,
            400 => Self::ServerBusy,
            500 | 501 => Self::InvalidCommand,
            _ => Self::Protocol,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nntp_code_classification_is_exhaustive() {
        assert_eq!(ErrorKind::from_nntp_code(430), ErrorKind::ArticleNotFound);
        assert_eq!(ErrorKind::from_nntp_code(423), ErrorKind::ArticleNotFound);
        assert_eq!(ErrorKind::from_nntp_code(411), ErrorKind::GroupNotFound);
        assert_eq!(ErrorKind::from_nntp_code(502), ErrorKind::Permission);
        assert_eq!(ErrorKind::from_nntp_code(503), ErrorKind::Permission);
        assert_eq!(ErrorKind::from_nntp_code(481), ErrorKind::Auth);
        assert_eq!(ErrorKind::from_nntp_code(482), ErrorKind::Auth);
        assert_eq!(ErrorKind::from_nntp_code(400), ErrorKind::ServerBusy);
        assert_eq!(ErrorKind::from_nntp_code(500), ErrorKind::InvalidCommand);
        assert_eq!(ErrorKind::from_nntp_code(501), ErrorKind::InvalidCommand);
        assert_eq!(ErrorKind::from_nntp_code(441), ErrorKind::Protocol);
    }

    #[test]
    fn retryability_matches_taxonomy() {
        assert!(ErrorKind::Connection.retryable());
        assert!(ErrorKind::Timeout.retryable());
        assert!(ErrorKind::ServerBusy.retryable());
        assert!(ErrorKind::NoAvailableConnection.retryable());
        assert!(ErrorKind::HosterUnavailable.retryable());

        assert!(!ErrorKind::ArticleNotFound.retryable());
        assert!(!ErrorKind::GroupNotFound.retryable());
        assert!(!ErrorKind::Permission.retryable());
        assert!(!ErrorKind::Auth.retryable());
        assert!(!ErrorKind::TrafficExceeded.retryable());
        assert!(!ErrorKind::InvalidNzb.retryable());
    }
}
