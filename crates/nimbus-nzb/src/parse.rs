//! Raw NZB XML parsing.

use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;

use crate::error::{MAX_NZB_BYTES, NzbError, NzbResult};

static QUOTED_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("static regex"));

/// Parsed but not yet classified NZB document.
#[derive(Debug, Clone, Default)]
pub struct RawNzb {
    /// `meta[name]` when present.
    pub name: Option<String>,
    /// `meta[title]` when present.
    pub title: Option<String>,
    /// `meta[password]` when present.
    pub password: Option<String>,
    /// `meta[category]` when present.
    pub category: Option<String>,
    /// Raw files in document order.
    pub files: Vec<RawNzbFile>,
}

/// One `<file>` element.
#[derive(Debug, Clone, Default)]
pub struct RawNzbFile {
    /// Subject line carrying the poster's file name.
    pub subject: String,
    /// Newsgroups the file was posted to.
    pub groups: Vec<String>,
    /// Segments in document order.
    pub segments: Vec<RawSegment>,
}

/// One `<segment>` element.
#[derive(Debug, Clone)]
pub struct RawSegment {
    /// Segment number, 1-based.
    pub number: u32,
    /// On-wire size in bytes.
    pub bytes: u64,
    /// Message-id without angle brackets.
    pub message_id: String,
}

/// File name extracted from a subject's quoted span, when present.
#[must_use]
pub fn subject_filename(subject: &str) -> Option<String> {
    QUOTED_NAME
        .captures(subject)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str().trim().to_owned())
}

/// Parse raw NZB XML.
///
/// # Errors
///
/// [`NzbError::SizeOutOfBounds`] for empty or oversized documents,
/// [`NzbError::Xml`] / [`NzbError::Structure`] for malformed content.
pub fn parse_xml(content: &str) -> NzbResult<RawNzb> {
    if content.is_empty() || content.len() > MAX_NZB_BYTES {
        return Err(NzbError::SizeOutOfBounds {
            size: content.len(),
        });
    }

    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut nzb = RawNzb::default();
    let mut current_file: Option<RawNzbFile> = None;
    let mut pending_meta: Option<String> = None;
    let mut pending_segment: Option<(u32, u64)> = None;
    let mut in_group = false;

    loop {
        match reader.read_event().map_err(|source| NzbError::Xml { source })? {
            Event::Start(element) | Event::Empty(element) => {
                match element.local_name().as_ref() {
                    b"meta" => {
                        pending_meta = attribute(&element, b"type")?;
                    }
                    b"file" => {
                        current_file = Some(RawNzbFile {
                            subject: attribute(&element, b"subject")?.unwrap_or_default(),
                            ..RawNzbFile::default()
                        });
                    }
                    b"group" => in_group = true,
                    b"segment" => {
                        let number = required_numeric(&element, b"number")?;
                        let bytes = required_numeric(&element, b"bytes")?;
                        let number = u32::try_from(number).map_err(|_| NzbError::Structure {
                            detail: format!("segment number {number} out of range"),
                        })?;
                        pending_segment = Some((number, bytes));
                    }
                    _ => {}
                }
            }
            Event::Text(text) => {
                let decoded = text.decode().map_err(|source| NzbError::Xml {
                    source: quick_xml::Error::from(source),
                })?;
                let value = quick_xml::escape::unescape(&decoded)
                    .map_err(|source| NzbError::Xml {
                        source: quick_xml::Error::from(source),
                    })?
                    .into_owned();
                if let Some(kind) = pending_meta.take() {
                    match kind.as_str() {
                        "name" => nzb.name = Some(value),
                        "title" => nzb.title = Some(value),
                        "password" => nzb.password = Some(value),
                        "category" => nzb.category = Some(value),
                        _ => {}
                    }
                } else if in_group {
                    if let Some(file) = current_file.as_mut() {
                        file.groups.push(value);
                    }
                } else if let Some((number, bytes)) = pending_segment.take() {
                    if let Some(file) = current_file.as_mut() {
                        file.segments.push(RawSegment {
                            number,
                            bytes,
                            message_id: value.trim().to_owned(),
                        });
                    }
                }
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"file" => {
                    if let Some(file) = current_file.take() {
                        nzb.files.push(file);
                    }
                }
                b"group" => in_group = false,
                b"segment" => pending_segment = None,
                b"meta" => pending_meta = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if nzb.files.is_empty() {
        return Err(NzbError::Structure {
            detail: "document contains no <file> elements".to_owned(),
        });
    }
    Ok(nzb)
}

fn attribute(
    element: &quick_xml::events::BytesStart<'_>,
    name: &[u8],
) -> NzbResult<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|err| NzbError::Structure {
            detail: format!("bad attribute: {err}"),
        })?;
        if attr.key.local_name().as_ref() == name {
            let value = attr.unescape_value().map_err(|err| NzbError::Structure {
                detail: format!("bad attribute value: {err}"),
            })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required_numeric(element: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> NzbResult<u64> {
    let raw = attribute(element, name)?.ok_or_else(|| NzbError::Structure {
        detail: format!("segment missing '{}'", String::from_utf8_lossy(name)),
    })?;
    raw.parse().map_err(|_| NzbError::Structure {
        detail: format!("segment attribute '{}' is not numeric", String::from_utf8_lossy(name)),
    })
}
