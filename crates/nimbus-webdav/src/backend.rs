//! The contract shared by the debrid and usenet WebDAV backends.

use async_trait::async_trait;
use axum::body::Body;
use chrono::{DateTime, Utc};
use nimbus_core::FileInfo;
use tokio::sync::watch;

use crate::error::{DavError, DavResult};

/// A WebDAV path below the provider root, at most three segments deep:
/// `/<parent>/<entity>[/<file…>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavPath {
    /// Top-level virtual directory (`__all__`, `__bad__`, custom…).
    pub parent: Option<String>,
    /// Torrent folder or NZB name.
    pub entity: Option<String>,
    /// File name inside the entity, slash-joined when nested.
    pub file: Option<String>,
}

impl DavPath {
    /// Split a decoded sub-path into its components.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut segments = raw.split('/').filter(|segment| !segment.is_empty());
        let parent = segments.next().map(str::to_owned);
        let entity = segments.next().map(str::to_owned);
        let rest: Vec<&str> = segments.collect();
        let file = if rest.is_empty() {
            None
        } else {
            Some(rest.join("/"))
        };
        Self {
            parent,
            entity,
            file,
        }
    }

    /// Whether this addresses the provider root.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// What a resolved path points at.
pub enum DavNode {
    /// A virtual directory with its children.
    Dir {
        /// Display name of the directory.
        name: String,
        /// Child entries in listing order.
        entries: Vec<FileInfo>,
        /// Directory modification time.
        mod_time: DateTime<Utc>,
    },
    /// A servable file.
    File {
        /// Listing entry describing the file.
        info: FileInfo,
        /// Content-Type served for GET.
        content_type: &'static str,
    },
}

/// How a file's bytes reach the client.
pub enum ServeOutcome {
    /// Small preloaded content (`version.txt`), served with full range
    /// support by the handler itself.
    Preloaded(Vec<u8>),
    /// A streaming body already restricted to the requested range.
    Stream(Body),
    /// Hand the client to rclone via `X-Accel-Redirect`.
    Redirect {
        /// Direct URL to redirect to.
        location: String,
    },
}

/// One provider subtree of the WebDAV namespace.
#[async_trait]
pub trait DavBackend: Send + Sync {
    /// Provider name; the path segment under `/webdav/`.
    fn provider(&self) -> &str;

    /// Top-level directory names, excluding `version.txt`.
    fn parents(&self) -> Vec<String>;

    /// Readiness signal gating requests until the initial sync completes.
    fn readiness(&self) -> watch::Receiver<bool>;

    /// Resolve a path to a node.
    async fn open(&self, path: &DavPath) -> DavResult<DavNode>;

    /// Open a file's content for `[start, end]` (inclusive).
    async fn serve(&self, path: &DavPath, start: u64, end: u64) -> DavResult<ServeOutcome>;

    /// DELETE semantics: entity paths remove the whole entity, file paths
    /// mark the logical file deleted. Root, parents, and `version.txt`
    /// are rejected.
    async fn remove(&self, path: &DavPath) -> DavResult<()>;

    /// Ids currently listed under `__bad__`, for bulk deletion.
    async fn bad_ids(&self) -> Vec<String>;

    /// Remove an entity by backend id (bulk deletion path).
    async fn remove_by_id(&self, id: &str) -> DavResult<()>;
}

/// Shared guard: reject writes against structural paths.
pub(crate) fn guard_removable(path: &DavPath) -> DavResult<()> {
    if path.is_root() || path.entity.is_none() {
        return Err(DavError::permission("parents are not removable"));
    }
    if path.parent.as_deref() == Some("version.txt")
        || path.entity.as_deref() == Some("version.txt")
    {
        return Err(DavError::permission("version.txt is not removable"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_split_into_three_levels() {
        assert_eq!(DavPath::parse(""), DavPath::default());
        assert_eq!(
            DavPath::parse("/__all__"),
            DavPath {
                parent: Some("__all__".into()),
                entity: None,
                file: None,
            }
        );
        assert_eq!(
            DavPath::parse("/__all__/My.Show/Season 1/e01.mkv"),
            DavPath {
                parent: Some("__all__".into()),
                entity: Some("My.Show".into()),
                file: Some("Season 1/e01.mkv".into()),
            }
        );
    }

    #[test]
    fn structural_paths_are_not_removable() {
        assert!(guard_removable(&DavPath::parse("")).is_err());
        assert!(guard_removable(&DavPath::parse("/__all__")).is_err());
        assert!(guard_removable(&DavPath::parse("/version.txt")).is_err());
        assert!(guard_removable(&DavPath::parse("/__all__/Some.Torrent")).is_ok());
        assert!(guard_removable(&DavPath::parse("/__all__/Some.Torrent/file.mkv")).is_ok());
    }
}
