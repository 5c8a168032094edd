//! Filename sanitisation and the media content-type map.

/// Characters that are reserved on at least one supported filesystem.
const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Strip control characters and reserved filesystem punctuation from a name.
///
/// The result is safe to use both as an on-disk JSON file name and as a
/// WebDAV path segment. Interior whitespace is preserved; leading and
/// trailing whitespace is trimmed.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && !RESERVED.contains(c))
        .collect::<String>()
        .trim()
        .to_owned()
}

/// Resolve the `Content-Type` for a served file from its extension.
///
/// Falls back to `application/octet-stream` for anything outside the media
/// set the WebDAV layer advertises.
#[must_use]
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "ts" => "video/mp2t",
        "srt" => "application/x-subrip",
        "vtt" => "text/vtt",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_reserved_and_control_bytes() {
        assert_eq!(
            sanitize_file_name("My<Show>: S01/E02 \u{1}?*"),
            "MyShow S01E02"
        );
        assert_eq!(sanitize_file_name("  plain name  "), "plain name");
    }

    #[test]
    fn content_types_cover_the_media_set() {
        assert_eq!(content_type_for("a.MKV"), "video/x-matroska");
        assert_eq!(content_type_for("a.mp4"), "video/mp4");
        assert_eq!(content_type_for("a.m4v"), "video/mp4");
        assert_eq!(content_type_for("a.ts"), "video/mp2t");
        assert_eq!(content_type_for("a.srt"), "application/x-subrip");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
