//! Torrent and download-link records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use nimbus_config::FolderNaming;
use serde::{Deserialize, Serialize};

/// One cached torrent as reported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Torrent {
    /// Provider-assigned identifier.
    pub id: String,
    /// BitTorrent infohash, lowercased hex.
    pub info_hash: String,
    /// Display name.
    pub name: String,
    /// File name reported by the provider.
    pub filename: String,
    /// Original file name before provider renaming.
    pub original_filename: String,
    /// Total payload size in bytes.
    pub size: u64,
    /// When the provider admitted the torrent.
    pub added_at: DateTime<Utc>,
    /// Logical files keyed by file name.
    pub files: HashMap<String, TorrentFile>,
}

impl Torrent {
    /// A torrent is complete when it has at least one file and every
    /// non-deleted file carries a restricted link.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.files.is_empty()
            && self
                .files
                .values()
                .filter(|file| !file.deleted)
                .all(|file| !file.link.is_empty())
    }
}

/// One logical file inside a torrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentFile {
    /// Id of the torrent this file came from; differs from the enclosing
    /// folder's id after a merge.
    pub torrent_id: String,
    /// File name, the map key repeated for serialisation.
    pub name: String,
    /// Path inside the torrent payload.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Restricted link to exchange for a direct URL; empty when missing.
    #[serde(default)]
    pub link: String,
    /// Byte range of the file inside an enclosing archive, when embedded.
    #[serde(default)]
    pub byte_range: Option<(u64, u64)>,
    /// Whether the file is a RAR volume.
    #[serde(default)]
    pub is_rar: bool,
    /// Logical deletion flag; hides the file without touching the remote.
    #[serde(default)]
    pub deleted: bool,
}

/// A torrent plus cache bookkeeping, persisted one JSON document per id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTorrent {
    /// The torrent body.
    #[serde(flatten)]
    pub torrent: Torrent,
    /// When the cache first saw the torrent.
    pub added_on: DateTime<Utc>,
    /// Completeness snapshot taken at insertion.
    pub is_complete: bool,
    /// Marked bad by a failed repair.
    #[serde(default)]
    pub bad: bool,
}

impl CachedTorrent {
    /// Wrap a torrent, stamping the cache metadata.
    #[must_use]
    pub fn new(torrent: Torrent) -> Self {
        let is_complete = torrent.is_complete();
        Self {
            torrent,
            added_on: Utc::now(),
            is_complete,
            bad: false,
        }
    }
}

/// A resolved direct download link, cached per account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLink {
    /// Provider-assigned link identifier.
    pub id: String,
    /// Opaque token returned alongside the link, when any.
    #[serde(default)]
    pub token: String,
    /// The restricted link this entry was resolved from.
    pub link: String,
    /// Direct download URL.
    pub download_link: String,
    /// Expiry; entries past this moment are unusable.
    pub expires_at: DateTime<Utc>,
    /// Account that issued the link.
    pub account_id: usize,
}

impl DownloadLink {
    /// Whether the entry can still be served.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.expires_at > Utc::now() && !self.download_link.is_empty()
    }
}

/// Derive the virtual folder name for a torrent under a naming policy.
#[must_use]
pub fn folder_name_for(torrent: &Torrent, naming: FolderNaming) -> String {
    let strip_ext = |name: &str| {
        name.rsplit_once('.')
            .map_or_else(|| name.to_owned(), |(stem, _)| stem.to_owned())
    };
    let name = match naming {
        FolderNaming::Filename => torrent.filename.clone(),
        FolderNaming::FilenameNoExt => strip_ext(&torrent.filename),
        FolderNaming::Original => torrent.original_filename.clone(),
        FolderNaming::OriginalNoExt => strip_ext(&torrent.original_filename),
        FolderNaming::Id => torrent.id.clone(),
        FolderNaming::InfohashLower => torrent.info_hash.to_lowercase(),
    };
    let name = nimbus_core::sanitize_file_name(&name);
    if name.is_empty() {
        torrent.id.clone()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent_with_files(files: Vec<TorrentFile>) -> Torrent {
        Torrent {
            id: "tor1".into(),
            info_hash: "ABCDEF0123".into(),
            name: "Release".into(),
            filename: "Release.2024.mkv".into(),
            original_filename: "Release.2024.Original.mkv".into(),
            size: 100,
            added_at: Utc::now(),
            files: files
                .into_iter()
                .map(|file| (file.name.clone(), file))
                .collect(),
        }
    }

    fn file(name: &str, link: &str, deleted: bool) -> TorrentFile {
        TorrentFile {
            torrent_id: "tor1".into(),
            name: name.into(),
            path: format!("/{name}"),
            size: 50,
            link: link.into(),
            byte_range: None,
            is_rar: false,
            deleted,
        }
    }

    #[test]
    fn completeness_requires_links_on_live_files_only() {
        assert!(!torrent_with_files(Vec::new()).is_complete());
        assert!(
            torrent_with_files(vec![file("a.mkv", "https://l/1", false)]).is_complete()
        );
        assert!(
            !torrent_with_files(vec![
                file("a.mkv", "https://l/1", false),
                file("b.mkv", "", false),
            ])
            .is_complete()
        );
        // A deleted file without a link does not break completeness.
        assert!(
            torrent_with_files(vec![
                file("a.mkv", "https://l/1", false),
                file("b.mkv", "", true),
            ])
            .is_complete()
        );
    }

    #[test]
    fn folder_names_follow_the_policy() {
        let torrent = torrent_with_files(Vec::new());
        assert_eq!(
            folder_name_for(&torrent, FolderNaming::Filename),
            "Release.2024.mkv"
        );
        assert_eq!(
            folder_name_for(&torrent, FolderNaming::FilenameNoExt),
            "Release.2024"
        );
        assert_eq!(
            folder_name_for(&torrent, FolderNaming::OriginalNoExt),
            "Release.2024.Original"
        );
        assert_eq!(folder_name_for(&torrent, FolderNaming::Id), "tor1");
        assert_eq!(
            folder_name_for(&torrent, FolderNaming::InfohashLower),
            "abcdef0123"
        );
    }

    #[test]
    fn expired_or_empty_links_are_unusable() {
        let mut link = DownloadLink {
            id: "dl1".into(),
            token: String::new(),
            link: "https://restricted/x".into(),
            download_link: "https://direct/x".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            account_id: 0,
        };
        assert!(link.is_usable());
        link.download_link.clear();
        assert!(!link.is_usable());
        link.download_link = "https://direct/x".into();
        link.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(!link.is_usable());
    }
}
