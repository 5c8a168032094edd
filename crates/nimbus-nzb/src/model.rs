//! Logical NZB records persisted by the usenet store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle status of an NZB record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NzbStatus {
    /// Parsed but not yet queued.
    Parsed,
    /// Accepted for download.
    Queued,
    /// Download in progress.
    Downloading,
    /// Download finished and persisted.
    Completed,
    /// Download failed terminally.
    Failed,
}

/// One logical Usenet release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nzb {
    /// Deterministic identifier, sixteen lowercase hex characters.
    pub id: String,
    /// Sanitised release name.
    pub name: String,
    /// Display title from the NZB metadata when present.
    pub title: String,
    /// Owning category (store partition).
    pub category: String,
    /// Archive password from the NZB metadata, empty when none.
    pub password: String,
    /// Sum of logical file sizes in bytes.
    pub total_size: u64,
    /// When the record was imported.
    pub added_on: DateTime<Utc>,
    /// Lifecycle status.
    pub status: NzbStatus,
    /// When the download completed, for completed records.
    #[serde(default)]
    pub completed_on: Option<DateTime<Utc>>,
    /// Download progress in percent, driven by the queue.
    #[serde(default)]
    pub progress: u8,
    /// Whether the payload has been fully downloaded.
    #[serde(default)]
    pub downloaded: bool,
    /// Storage path assigned when completed.
    #[serde(default)]
    pub storage: String,
    /// Logical files in this release.
    pub files: Vec<NzbFile>,
    /// Marked bad by a failed stream or repair.
    #[serde(default)]
    pub is_bad: bool,
}

impl Nzb {
    /// Look up a logical file by name, ignoring deleted entries.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<&NzbFile> {
        self.files
            .iter()
            .find(|file| !file.deleted && file.name == name)
    }
}

/// One logical file inside an NZB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NzbFile {
    /// Owning NZB id.
    pub nzb_id: String,
    /// Logical file name; for RAR archives the inner media name when known.
    pub name: String,
    /// Decoded size in bytes (probed or estimated).
    pub size: u64,
    /// Decoded bytes per segment when known, zero until probed.
    #[serde(default)]
    pub segment_size: u64,
    /// Archive-internal byte offset of the inner payload for store-mode RAR.
    #[serde(default)]
    pub start_offset: u64,
    /// Whether the logical file is wrapped in a RAR archive.
    #[serde(default)]
    pub is_rar_archive: bool,
    /// Archive password inherited from the NZB.
    #[serde(default)]
    pub password: String,
    /// Newsgroups the segments were posted to.
    pub groups: Vec<String>,
    /// Ordered article segments.
    pub segments: Vec<NzbSegment>,
    /// Logical deletion flag; hides the file without touching remote data.
    #[serde(default)]
    pub deleted: bool,
}

/// One article segment of a logical file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NzbSegment {
    /// Segment number within its raw file, 1-based.
    pub number: u32,
    /// Message-id without angle brackets as listed in the NZB.
    pub message_id: String,
    /// On-wire (yEnc-encoded) size in bytes.
    pub bytes: u64,
    /// First decoded byte offset within the logical file.
    pub start_offset: u64,
    /// One past the last decoded byte offset within the logical file.
    pub end_offset: u64,
    /// Newsgroup used to fetch this segment.
    pub group: String,
}

/// Deterministic NZB identifier.
///
/// `sha256(name ∥ total_size ∥ category ∥ password)` truncated to sixteen
/// lowercase hex characters, so re-importing the same content is
/// idempotent.
#[must_use]
pub fn compute_id(name: &str, total_size: u64, category: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(total_size.to_string().as_bytes());
    hasher.update(category.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())[..16].to_owned()
}
