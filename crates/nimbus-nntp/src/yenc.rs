//! yEnc decoding and header parsing.
//!
//! yEnc frames an 8-bit payload in text lines: a `=ybegin` header (with an
//! optional `=ypart` line for multi-part posts), encoded data lines, and a
//! `=yend` trailer. Each payload byte is `encoded - 42` modulo 256, with a
//! leading `=` escaping the next byte as `encoded - 64 - 42`. Density is
//! roughly 96.8 %, which the NZB parser uses to estimate decoded sizes
//! before any header has been fetched.

use thiserror::Error;

/// Empirical decoded/encoded density of yEnc bodies.
pub const YENC_DENSITY: f64 = 0.968;

/// Errors raised by the decoder.
#[derive(Debug, Error)]
pub enum YencError {
    /// The body carried no `=ybegin` header.
    #[error("missing =ybegin header")]
    MissingHeader,
    /// A header line was present but unparseable.
    #[error("malformed yEnc header: {detail}")]
    MalformedHeader {
        /// What failed to parse.
        detail: String,
    },
    /// The data ended with a dangling escape byte.
    #[error("truncated escape sequence")]
    TruncatedEscape,
}

/// Fields of a `=ybegin` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YencHeader {
    /// Declared file name; authoritative over the NZB subject when present.
    pub name: String,
    /// Declared total file size in bytes.
    pub size: u64,
    /// Declared encoded line length.
    pub line: Option<u64>,
    /// Part number for multi-part posts.
    pub part: Option<u64>,
    /// Total number of parts when declared.
    pub total: Option<u64>,
}

/// Fields of a `=ypart` line. Offsets are 1-based as transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YencPart {
    /// First byte of this part within the whole file, 1-based.
    pub begin: u64,
    /// Last byte of this part within the whole file, inclusive.
    pub end: u64,
}

impl YencPart {
    /// Decoded size of this part in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.begin.saturating_sub(1))
    }

    /// Whether the part declares an empty range.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fully decoded yEnc body.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// Parsed `=ybegin` fields.
    pub header: YencHeader,
    /// Parsed `=ypart` fields when present.
    pub part: Option<YencPart>,
    /// Decoded payload bytes.
    pub data: Vec<u8>,
}

/// Decode a dot-unstuffed article body.
///
/// The input must preserve the original CRLF line breaks; the connection
/// layer guarantees this.
///
/// # Errors
///
/// Returns [`YencError::MissingHeader`] when no `=ybegin` line is found,
/// [`YencError::MalformedHeader`] when a header field is unparseable, and
/// [`YencError::TruncatedEscape`] when the payload ends mid-escape.
pub fn decode(body: &[u8]) -> Result<Decoded, YencError> {
    let mut header = None;
    let mut part = None;
    let mut data = Vec::with_capacity(body.len());

    for line in body.split(|&b| b == b'\n') {
        let line = strip_cr(line);
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix(b"=ybegin ") {
            header = Some(parse_header(rest)?);
            continue;
        }
        if let Some(rest) = line.strip_prefix(b"=ypart ") {
            part = Some(parse_part(rest)?);
            continue;
        }
        if line.starts_with(b"=yend") {
            break;
        }
        if header.is_some() {
            decode_line(line, &mut data)?;
        }
    }

    let header = header.ok_or(YencError::MissingHeader)?;
    Ok(Decoded { header, part, data })
}

/// Parse only the `=ybegin` / `=ypart` headers without decoding the payload.
///
/// Used by the NZB parser to probe sizes and names from a first segment
/// without paying for a full decode.
///
/// # Errors
///
/// Same conditions as [`decode`], minus payload errors.
pub fn parse_headers(body: &[u8]) -> Result<(YencHeader, Option<YencPart>), YencError> {
    let mut header = None;
    let mut part = None;
    for line in body.split(|&b| b == b'\n') {
        let line = strip_cr(line);
        if let Some(rest) = line.strip_prefix(b"=ybegin ") {
            header = Some(parse_header(rest)?);
        } else if let Some(rest) = line.strip_prefix(b"=ypart ") {
            part = Some(parse_part(rest)?);
            break;
        } else if header.is_some() {
            // Data started; no =ypart follows.
            break;
        }
    }
    let header = header.ok_or(YencError::MissingHeader)?;
    Ok((header, part))
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn decode_line(line: &[u8], out: &mut Vec<u8>) -> Result<(), YencError> {
    let mut bytes = line.iter().copied();
    while let Some(byte) = bytes.next() {
        if byte == b'=' {
            let escaped = bytes.next().ok_or(YencError::TruncatedEscape)?;
            out.push(escaped.wrapping_sub(64).wrapping_sub(42));
        } else {
            out.push(byte.wrapping_sub(42));
        }
    }
    Ok(())
}

fn parse_header(rest: &[u8]) -> Result<YencHeader, YencError> {
    let text = String::from_utf8_lossy(rest);
    // `name=` is always the final attribute and may contain spaces and `=`.
    let (attrs, name) = text.split_once("name=").map_or_else(
        || (text.as_ref(), None),
        |(attrs, name)| (attrs, Some(name.trim().to_owned())),
    );

    let mut size = None;
    let mut line = None;
    let mut part = None;
    let mut total = None;
    for token in attrs.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let value: u64 = value.parse().map_err(|_| YencError::MalformedHeader {
            detail: format!("{key}={value}"),
        })?;
        match key {
            "size" => size = Some(value),
            "line" => line = Some(value),
            "part" => part = Some(value),
            "total" => total = Some(value),
            _ => {}
        }
    }

    Ok(YencHeader {
        name: name.unwrap_or_default(),
        size: size.ok_or_else(|| YencError::MalformedHeader {
            detail: "missing size".to_owned(),
        })?,
        line,
        part,
        total,
    })
}

fn parse_part(rest: &[u8]) -> Result<YencPart, YencError> {
    let text = String::from_utf8_lossy(rest);
    let mut begin = None;
    let mut end = None;
    for token in text.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let value: u64 = value.parse().map_err(|_| YencError::MalformedHeader {
            detail: format!("{key}={value}"),
        })?;
        match key {
            "begin" => begin = Some(value),
            "end" => end = Some(value),
            _ => {}
        }
    }
    match (begin, end) {
        (Some(begin), Some(end)) => Ok(YencPart { begin, end }),
        _ => Err(YencError::MalformedHeader {
            detail: "ypart requires begin and end".to_owned(),
        }),
    }
}
