//! Error types for NZB parsing.

use nimbus_core::ErrorKind;
use thiserror::Error;

/// Convenience alias for parser results.
pub type NzbResult<T> = Result<T, NzbError>;

/// Hard cap on accepted NZB documents.
pub(crate) const MAX_NZB_BYTES: usize = 100 * 1024 * 1024;

/// Errors raised while parsing an NZB into logical files.
#[derive(Debug, Error)]
pub enum NzbError {
    /// The document was empty or exceeded the size cap.
    #[error("nzb content size {size} outside accepted bounds")]
    SizeOutOfBounds {
        /// Observed content size in bytes.
        size: usize,
    },
    /// The XML failed to parse.
    #[error("nzb xml is malformed")]
    Xml {
        /// Underlying XML error.
        #[source]
        source: quick_xml::Error,
    },
    /// A required attribute or element was missing or invalid.
    #[error("nzb structure invalid: {detail}")]
    Structure {
        /// What was missing or invalid.
        detail: String,
    },
    /// No usable file groups survived classification.
    #[error("nzb produced no usable files")]
    NoValidFiles,
}

impl NzbError {
    /// Every parser failure maps to the same taxonomy kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidNzb
    }
}
