//! WebDAV error type and status mapping.

use axum::http::StatusCode;
use nimbus_core::ErrorKind;
use thiserror::Error;

/// Convenience alias for WebDAV results.
pub type DavResult<T> = Result<T, DavError>;

/// A classified failure carrying enough context for a response.
#[derive(Debug, Error)]
#[error("{kind}: {detail}")]
pub struct DavError {
    /// Taxonomy classification driving the HTTP status.
    pub kind: ErrorKind,
    /// Human-readable detail, logged but not leaked to clients.
    pub detail: String,
}

impl DavError {
    /// Construct an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Missing entity shorthand.
    #[must_use]
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, detail)
    }

    /// Read-only violation shorthand.
    #[must_use]
    pub fn permission(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, detail)
    }

    /// HTTP status for this failure.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::NotFound
            | ErrorKind::ArticleNotFound
            | ErrorKind::GroupNotFound
            | ErrorKind::InvalidNzb => StatusCode::NOT_FOUND,
            ErrorKind::Permission | ErrorKind::Auth => StatusCode::FORBIDDEN,
            ErrorKind::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            ErrorKind::TrafficExceeded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::InvalidCommand => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_error_mapping() {
        assert_eq!(
            DavError::not_found("x").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DavError::permission("x").status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            DavError::new(ErrorKind::InvalidRange, "x").status(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(
            DavError::new(ErrorKind::TrafficExceeded, "x").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            DavError::new(ErrorKind::Connection, "x").status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            DavError::new(ErrorKind::Timeout, "x").status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
