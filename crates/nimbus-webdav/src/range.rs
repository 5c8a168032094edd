//! Single-range `Range` header parsing.

use nimbus_core::ErrorKind;

use crate::error::{DavError, DavResult};

/// Parse a `Range` header against a resource of `size` bytes.
///
/// Accepts `bytes=a-b`, `bytes=a-`, and `bytes=-n`; multi-range requests
/// are rejected. The result is an inclusive `[start, end]` pair.
///
/// # Errors
///
/// [`ErrorKind::InvalidRange`] for every malformed or unsatisfiable form;
/// the caller answers 416 with `Content-Range: bytes */size`.
pub fn parse_range(header: &str, size: u64) -> DavResult<(u64, u64)> {
    let invalid = || DavError::new(ErrorKind::InvalidRange, format!("range '{header}'"));

    let spec = header.strip_prefix("bytes=").ok_or_else(invalid)?;
    if spec.contains(',') {
        return Err(invalid());
    }
    let (raw_start, raw_end) = spec.split_once('-').ok_or_else(invalid)?;

    match (raw_start.is_empty(), raw_end.is_empty()) {
        // bytes=-n : final n bytes.
        (true, false) => {
            let suffix: u64 = raw_end.parse().map_err(|_| invalid())?;
            if suffix == 0 || size == 0 {
                return Err(invalid());
            }
            let len = suffix.min(size);
            Ok((size - len, size - 1))
        }
        // bytes=a- : from a to the end.
        (false, true) => {
            let start: u64 = raw_start.parse().map_err(|_| invalid())?;
            if start >= size {
                return Err(invalid());
            }
            Ok((start, size - 1))
        }
        // bytes=a-b : clamped inclusive range.
        (false, false) => {
            let start: u64 = raw_start.parse().map_err(|_| invalid())?;
            let end: u64 = raw_end.parse().map_err(|_| invalid())?;
            if start > end || start >= size {
                return Err(invalid());
            }
            Ok((start, end.min(size - 1)))
        }
        (true, true) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_ranges_clamp_to_size() {
        assert_eq!(parse_range("bytes=0-499", 1_000).expect("valid"), (0, 499));
        assert_eq!(parse_range("bytes=500-9999", 1_000).expect("valid"), (500, 999));
    }

    #[test]
    fn open_ended_ranges_run_to_the_last_byte() {
        assert_eq!(parse_range("bytes=200-", 1_000).expect("valid"), (200, 999));
    }

    #[test]
    fn suffix_ranges_take_the_final_bytes() {
        assert_eq!(parse_range("bytes=-100", 1_000).expect("valid"), (900, 999));
        // A suffix longer than the file is the whole file.
        assert_eq!(parse_range("bytes=-5000", 1_000).expect("valid"), (0, 999));
    }

    #[test]
    fn malformed_and_multi_ranges_are_rejected() {
        assert!(parse_range("bytes=0-100,200-300", 1_000).is_err());
        assert!(parse_range("items=0-1", 1_000).is_err());
        assert!(parse_range("bytes=-", 1_000).is_err());
        assert!(parse_range("bytes=a-b", 1_000).is_err());
        assert!(parse_range("bytes=1000-", 1_000).is_err());
        assert!(parse_range("bytes=5-2", 1_000).is_err());
        assert!(parse_range("bytes=-0", 1_000).is_err());
    }
}
