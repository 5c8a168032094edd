//! Error types for debrid provider integration.

use nimbus_core::ErrorKind;
use thiserror::Error;

/// Convenience alias for debrid results.
pub type DebridResult<T> = Result<T, DebridError>;

/// Reason a cached download link was invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// The upstream answered 404 for the direct URL.
    LinkNotFound,
    /// The upstream reported exhausted bandwidth; disables the account.
    BandwidthExceeded,
}

impl InvalidReason {
    /// Stable label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LinkNotFound => "link_not_found",
            Self::BandwidthExceeded => "bandwidth_exceeded",
        }
    }
}

/// Errors raised by provider clients and the torrent cache.
#[derive(Debug, Error)]
pub enum DebridError {
    /// The HTTP transport failed.
    #[error("debrid transport failed")]
    Http {
        /// Underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The API rejected the request.
    #[error("debrid api answered {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error body or status text.
        message: String,
    },
    /// The provider rejected the credentials.
    #[error("debrid authentication rejected")]
    Auth,
    /// The torrent or file does not exist upstream.
    #[error("debrid object '{id}' not found")]
    NotFound {
        /// Missing object identifier.
        id: String,
    },
    /// The hoster backing a link is unavailable; triggers a re-insert.
    #[error("hoster unavailable")]
    HosterUnavailable,
    /// The account exhausted its traffic allowance.
    #[error("traffic exceeded")]
    TrafficExceeded,
    /// The account hit its active-download limit.
    #[error("too many active downloads")]
    TooManyActiveDownloads,
    /// Every account on the provider is disabled.
    #[error("no enabled account")]
    NoEnabledAccount,
    /// A repair attempt failed terminally.
    #[error("repair failed for torrent '{torrent_id}': {detail}")]
    Repair {
        /// Torrent being repaired.
        torrent_id: String,
        /// What went wrong.
        detail: String,
    },
}

impl DebridError {
    /// Classify into the engine-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Http { .. } => ErrorKind::Connection,
            Self::Api { .. } | Self::Repair { .. } => ErrorKind::Protocol,
            Self::Auth | Self::NoEnabledAccount => ErrorKind::Auth,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::HosterUnavailable | Self::TooManyActiveDownloads => {
                ErrorKind::HosterUnavailable
            }
            Self::TrafficExceeded => ErrorKind::TrafficExceeded,
        }
    }

    /// Whether the operation may be retried.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        self.kind().retryable()
    }
}
