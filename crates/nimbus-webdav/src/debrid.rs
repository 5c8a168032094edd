//! Debrid-backed WebDAV subtree.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use chrono::Utc;
use futures_util::TryStreamExt;
use nimbus_core::{BuildInfo, FileInfo, content_type_for};
use nimbus_debrid::{
    DebridResult, DebridStreamer, DownloadLink, InvalidReason, LinkSupplier, ResolvedLink,
    TorrentCache, TorrentFile,
};
use tokio::sync::watch;
use tracing::debug;

use crate::backend::{DavBackend, DavNode, DavPath, ServeOutcome, guard_removable};
use crate::error::{DavError, DavResult};

/// WebDAV backend over one provider's torrent cache.
pub struct DebridDavBackend {
    cache: Arc<TorrentCache>,
    streamer: Arc<DebridStreamer>,
    build_info: BuildInfo,
}

impl DebridDavBackend {
    /// Wrap a torrent cache.
    #[must_use]
    pub fn new(cache: Arc<TorrentCache>, build_info: BuildInfo) -> Self {
        Self {
            cache,
            streamer: Arc::new(DebridStreamer::new()),
            build_info,
        }
    }

    fn version_entry(&self) -> FileInfo {
        FileInfo::file(
            "version.txt",
            self.build_info.render().len() as u64,
            Utc::now(),
        )
    }

    async fn resolve_file(&self, path: &DavPath) -> DavResult<(String, TorrentFile)> {
        let folder = path
            .entity
            .as_deref()
            .ok_or_else(|| DavError::not_found("missing entity"))?;
        let file_name = path
            .file
            .as_deref()
            .ok_or_else(|| DavError::not_found("missing file"))?;
        let file = self
            .cache
            .file(folder, file_name)
            .await
            .ok_or_else(|| DavError::not_found(format!("{folder}/{file_name}")))?;
        Ok((folder.to_owned(), file))
    }
}

/// Supplier bridging the upstream streamer back into the cache.
struct CacheLinkSupplier {
    cache: Arc<TorrentCache>,
    folder: String,
    file_name: String,
    restricted: String,
}

#[async_trait]
impl LinkSupplier for CacheLinkSupplier {
    async fn fresh_link(&self) -> DebridResult<ResolvedLink> {
        let link = self
            .cache
            .get_download_link(&self.folder, &self.file_name, &self.restricted)
            .await?;
        Ok(ResolvedLink {
            url: link.download_link.clone(),
            record: link,
        })
    }

    async fn mark_invalid(&self, link: &DownloadLink, reason: InvalidReason) {
        self.cache.mark_link_invalid(link, reason);
    }
}

#[async_trait]
impl DavBackend for DebridDavBackend {
    fn provider(&self) -> &str {
        self.cache.provider()
    }

    fn parents(&self) -> Vec<String> {
        let mut parents = vec![
            "__all__".to_owned(),
            "__bad__".to_owned(),
            "torrents".to_owned(),
        ];
        parents.extend(self.cache.custom_folder_names());
        parents
    }

    fn readiness(&self) -> watch::Receiver<bool> {
        self.cache.ready_receiver()
    }

    async fn open(&self, path: &DavPath) -> DavResult<DavNode> {
        let Some(parent) = path.parent.as_deref() else {
            // Provider root: the parent directories plus version.txt.
            let mut entries: Vec<FileInfo> = self
                .parents()
                .into_iter()
                .map(|name| FileInfo::dir(name, Utc::now()))
                .collect();
            entries.push(self.version_entry());
            return Ok(DavNode::Dir {
                name: self.provider().to_owned(),
                entries,
                mod_time: Utc::now(),
            });
        };

        if parent == "version.txt" {
            return Ok(DavNode::File {
                info: self.version_entry(),
                content_type: "text/plain",
            });
        }

        let listing = self
            .cache
            .listing(parent)
            .await
            .ok_or_else(|| DavError::not_found(format!("parent '{parent}'")))?;

        let Some(entity) = path.entity.as_deref() else {
            return Ok(DavNode::Dir {
                name: parent.to_owned(),
                entries: listing.as_ref().clone(),
                mod_time: Utc::now(),
            });
        };

        if path.file.is_none() {
            let entries = self
                .cache
                .folder_listing(entity)
                .await
                .ok_or_else(|| DavError::not_found(format!("torrent '{entity}'")))?;
            let mod_time = self
                .cache
                .torrent_by_folder(entity)
                .await
                .map_or_else(Utc::now, |cached| cached.added_on);
            return Ok(DavNode::Dir {
                name: entity.to_owned(),
                entries,
                mod_time,
            });
        }

        let (_, file) = self.resolve_file(path).await?;
        let mod_time = self
            .cache
            .torrent_by_folder(entity)
            .await
            .map_or_else(Utc::now, |cached| cached.added_on);
        Ok(DavNode::File {
            info: FileInfo::file(file.name.clone(), file.size, mod_time),
            content_type: content_type_for(&file.name),
        })
    }

    async fn serve(&self, path: &DavPath, start: u64, end: u64) -> DavResult<ServeOutcome> {
        if path.parent.as_deref() == Some("version.txt") {
            return Ok(ServeOutcome::Preloaded(
                self.build_info.render().into_bytes(),
            ));
        }
        let (folder, file) = self.resolve_file(path).await?;

        // RAR-embedded payloads map inner offsets onto the archive range
        // recorded at import; store mode keeps the mapping byte-exact.
        let (upstream_start, upstream_end) = if file.is_rar {
            match file.byte_range {
                Some((inner_start, _)) => (inner_start + start, inner_start + end),
                None => (start, end),
            }
        } else {
            (start, end)
        };

        let supplier = CacheLinkSupplier {
            cache: Arc::clone(&self.cache),
            folder,
            file_name: file.name.clone(),
            restricted: file.link.clone(),
        };

        if self.cache.serve_from_rclone() && !file.is_rar {
            let resolved = supplier
                .fresh_link()
                .await
                .map_err(|err| DavError::new(err.kind(), err.to_string()))?;
            return Ok(ServeOutcome::Redirect {
                location: resolved.url,
            });
        }

        let disposition = self
            .streamer
            .open(upstream_start, upstream_end, &supplier)
            .await
            .map_err(|err| DavError::new(err.kind(), err.to_string()))?;
        debug!(file = %file.name, start, end, "proxying upstream range");

        let stream = disposition
            .response
            .bytes_stream()
            .map_err(std::io::Error::other);
        Ok(ServeOutcome::Stream(Body::from_stream(stream)))
    }

    async fn remove(&self, path: &DavPath) -> DavResult<()> {
        guard_removable(path)?;
        let entity = path.entity.as_deref().unwrap_or_default();

        if let Some(file_name) = path.file.as_deref() {
            if self.cache.remove_file(entity, file_name).await {
                return Ok(());
            }
            return Err(DavError::not_found(format!("{entity}/{file_name}")));
        }

        let cached = self
            .cache
            .torrent_by_folder(entity)
            .await
            .ok_or_else(|| DavError::not_found(format!("torrent '{entity}'")))?;
        self.cache
            .on_remove(&cached.torrent.id)
            .await
            .map_err(|err| DavError::new(err.kind(), err.to_string()))
    }

    async fn bad_ids(&self) -> Vec<String> {
        self.cache.bad_torrent_ids().await
    }

    async fn remove_by_id(&self, id: &str) -> DavResult<()> {
        self.cache
            .on_remove(id)
            .await
            .map_err(|err| DavError::new(err.kind(), err.to_string()))
    }
}
