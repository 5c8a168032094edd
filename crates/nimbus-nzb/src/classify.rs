//! File classification by name and by magic bytes, and base-name grouping.

use once_cell::sync::Lazy;
use regex::Regex;

/// Classification of a raw NZB file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    /// Playable media; exposed directly.
    Media,
    /// RAR volume; exposed through the range extractor.
    Rar,
    /// Non-RAR archive; dropped (cannot be seeked).
    Archive,
    /// Sidecar noise (par2, nfo, artwork); dropped.
    Ignore,
    /// Needs a content probe to decide.
    Unknown,
}

const MEDIA_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "avi", "mov", "ts", "m2ts", "wmv", "mpeg", "mpg", "webm", "flv", "vob",
    "divx", "mp3", "flac", "opus", "aac", "ogg", "wav", "m4a", "wma",
];

const IGNORE_EXTENSIONS: &[&str] = &[
    "par2", "sfv", "nfo", "jpg", "jpeg", "png", "txt", "srt", "idx", "sub",
];

static RAR_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\.rar|\.r\d{2}|\.part\d+\.rar)$").expect("static regex"));
static ARCHIVE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\.7z|\.7z\.\d{3}|\.zip|\.tar|\.gz|\.bz2)$").expect("static regex")
});
static PAR2_VOLUME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.vol\d+\+\d+\.par2?$").expect("static regex"));
static PART_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.part\d+\.[a-z0-9]+$").expect("static regex"));
static NUMERIC_EXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\d{2,4}$").expect("static regex"));
static FILE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\[\(](\d+)\s*/\s*\d+[\]\)]").expect("static regex"));

/// Classify a raw file from its name alone.
#[must_use]
pub fn classify_name(name: &str) -> FileClass {
    let lower = name.to_ascii_lowercase();
    let ext = lower.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    if MEDIA_EXTENSIONS.contains(&ext) {
        return FileClass::Media;
    }
    if RAR_NAME.is_match(&lower) {
        return FileClass::Rar;
    }
    if ARCHIVE_NAME.is_match(&lower) {
        return FileClass::Archive;
    }
    if IGNORE_EXTENSIONS.contains(&ext) {
        return FileClass::Ignore;
    }
    FileClass::Unknown
}

/// Classify decoded content from its leading bytes.
///
/// Unrecognised content is reported [`FileClass::Unknown`]; the caller
/// treats that as media, conservatively.
#[must_use]
pub fn classify_magic(data: &[u8]) -> FileClass {
    if data.starts_with(b"Rar!\x1A\x07\x00") || data.starts_with(b"Rar!\x1A\x07\x01\x00") {
        return FileClass::Rar;
    }
    if data.starts_with(b"PK\x03\x04") || data.starts_with(b"7z\xBC\xAF\x27\x1C") {
        return FileClass::Archive;
    }
    if data.starts_with(b"\x1A\x45\xDF\xA3") {
        return FileClass::Media; // EBML / Matroska
    }
    if data.len() >= 8 && &data[4..8] == b"ftyp" {
        return FileClass::Media; // ISO base media (mp4/mov/m4v)
    }
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"AVI " {
        return FileClass::Media;
    }
    if data.starts_with(b"\x00\x00\x01\xBA") || data.starts_with(b"\x00\x00\x01\xB3") {
        return FileClass::Media; // MPEG program/video stream
    }
    if data.len() > 188 && data[0] == 0x47 && data[188] == 0x47 {
        return FileClass::Media; // MPEG-TS sync bytes at packet boundaries
    }
    FileClass::Unknown
}

/// Strip grouping suffixes to find the name shared by a split file set.
///
/// Applied in priority order: PAR2 volume suffix, `.partN.<ext>`,
/// numeric extension (`.<ext>.NNN`), then the final extension.
#[must_use]
pub fn base_name(name: &str) -> String {
    if let Some(found) = PAR2_VOLUME.find(name) {
        return name[..found.start()].to_owned();
    }
    if let Some(found) = PART_SUFFIX.find(name) {
        return name[..found.start()].to_owned();
    }
    let mut trimmed = name;
    if let Some(found) = NUMERIC_EXT.find(trimmed) {
        trimmed = &trimmed[..found.start()];
    }
    trimmed
        .rsplit_once('.')
        .map_or(trimmed, |(stem, _)| stem)
        .to_owned()
}

/// Extract the raw-file ordinal from a subject like `[02/30]` or `(2/30)`.
#[must_use]
pub fn file_number(subject: &str) -> Option<u32> {
    FILE_NUMBER
        .captures(subject)
        .and_then(|captures| captures.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_classify_per_extension_tables() {
        assert_eq!(classify_name("Movie.2024.mkv"), FileClass::Media);
        assert_eq!(classify_name("track01.FLAC"), FileClass::Media);
        assert_eq!(classify_name("release.rar"), FileClass::Rar);
        assert_eq!(classify_name("release.r42"), FileClass::Rar);
        assert_eq!(classify_name("release.part003.rar"), FileClass::Rar);
        assert_eq!(classify_name("release.7z"), FileClass::Archive);
        assert_eq!(classify_name("release.7z.001"), FileClass::Archive);
        assert_eq!(classify_name("release.zip"), FileClass::Archive);
        assert_eq!(classify_name("release.par2"), FileClass::Ignore);
        assert_eq!(classify_name("cover.jpg"), FileClass::Ignore);
        assert_eq!(classify_name("mystery.bin"), FileClass::Unknown);
        assert_eq!(classify_name("noextension"), FileClass::Unknown);
    }

    #[test]
    fn magic_bytes_classify_per_signature_table() {
        assert_eq!(classify_magic(b"Rar!\x1A\x07\x00rest"), FileClass::Rar);
        assert_eq!(classify_magic(b"Rar!\x1A\x07\x01\x00rest"), FileClass::Rar);
        assert_eq!(classify_magic(b"PK\x03\x04rest"), FileClass::Archive);
        assert_eq!(classify_magic(b"7z\xBC\xAF\x27\x1Crest"), FileClass::Archive);
        assert_eq!(classify_magic(b"\x1A\x45\xDF\xA3rest"), FileClass::Media);
        assert_eq!(classify_magic(b"\x00\x00\x00\x20ftypisom"), FileClass::Media);
        assert_eq!(classify_magic(b"RIFF\x00\x00\x00\x00AVI "), FileClass::Media);
        assert_eq!(classify_magic(b"\x00\x00\x01\xBArest"), FileClass::Media);

        let mut ts = vec![0_u8; 189];
        ts[0] = 0x47;
        ts[188] = 0x47;
        assert_eq!(classify_magic(&ts), FileClass::Media);

        assert_eq!(classify_magic(b"garbage"), FileClass::Unknown);
    }

    #[test]
    fn base_names_strip_grouping_suffixes() {
        assert_eq!(base_name("release.vol03+04.par2"), "release");
        assert_eq!(base_name("release.part01.rar"), "release");
        assert_eq!(base_name("movie.mkv.001"), "movie");
        assert_eq!(base_name("movie.mkv"), "movie");
        assert_eq!(base_name("plain"), "plain");
    }

    #[test]
    fn subject_ordinals_parse_from_either_bracket_style() {
        assert_eq!(file_number("release [02/30] \"x.rar\" yEnc"), Some(2));
        assert_eq!(file_number("release (12/30) \"x.rar\""), Some(12));
        assert_eq!(file_number("no ordinal here"), None);
    }
}
