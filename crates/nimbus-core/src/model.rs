//! Listing entries and build metadata shared by both WebDAV backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in a virtual directory listing.
///
/// Listings are derived snapshots: the owning cache rebuilds the full sorted
/// slice on mutation and swaps it atomically, so a `FileInfo` is never
/// mutated in place after publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Display name inside the parent directory.
    pub name: String,
    /// Size in bytes; zero for directories.
    pub size: u64,
    /// Whether the entry is a virtual directory.
    pub is_dir: bool,
    /// Modification timestamp surfaced as `Last-Modified`.
    pub mod_time: DateTime<Utc>,
}

impl FileInfo {
    /// Construct a directory entry.
    #[must_use]
    pub fn dir(name: impl Into<String>, mod_time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            is_dir: true,
            mod_time,
        }
    }

    /// Construct a file entry.
    #[must_use]
    pub fn file(name: impl Into<String>, size: u64, mod_time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size,
            is_dir: false,
            mod_time,
        }
    }
}

/// Build metadata served as `version.txt` at each provider root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Package name.
    pub name: String,
    /// Semantic version baked in at compile time.
    pub version: String,
    /// Git SHA recorded by the build, `dev` when unavailable.
    pub build_sha: String,
}

impl BuildInfo {
    /// Render the `version.txt` payload.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{} {} ({})\n", self.name, self.version, self.build_sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_info_renders_single_line() {
        let info = BuildInfo {
            name: "nimbus".into(),
            version: "0.1.0".into(),
            build_sha: "dev".into(),
        };
        assert_eq!(info.render(), "nimbus 0.1.0 (dev)\n");
    }

    #[test]
    fn file_info_round_trips_through_json() {
        let entry = FileInfo::file("movie.mkv", 42, Utc::now());
        let raw = serde_json::to_string(&entry).expect("serialize");
        let back: FileInfo = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(back, entry);
    }
}
