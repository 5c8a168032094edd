//! Usenet-backed WebDAV subtree.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use chrono::Utc;
use nimbus_core::{BuildInfo, FileInfo, content_type_for};
use nimbus_nzb::NzbFile;
use nimbus_store::UsenetStore;
use nimbus_stream::SegmentStreamer;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

use crate::backend::{DavBackend, DavNode, DavPath, ServeOutcome, guard_removable};
use crate::error::{DavError, DavResult};

/// Pipe capacity between the segment streamer and the HTTP body.
const BODY_PIPE: usize = 512 * 1024;

/// WebDAV backend over the NZB store of one usenet server.
pub struct UsenetDavBackend {
    provider: String,
    store: Arc<UsenetStore>,
    streamer: SegmentStreamer,
    build_info: BuildInfo,
    ready: watch::Sender<bool>,
}

impl UsenetDavBackend {
    /// Wrap a store and streamer under a provider name.
    #[must_use]
    pub fn new(
        provider: String,
        store: Arc<UsenetStore>,
        streamer: SegmentStreamer,
        build_info: BuildInfo,
    ) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            provider,
            store,
            streamer,
            build_info,
            ready,
        }
    }

    /// Mark the backend ready once the store has loaded.
    pub fn mark_ready(&self) {
        let _ = self.ready.send(true);
    }

    fn version_entry(&self) -> FileInfo {
        FileInfo::file(
            "version.txt",
            self.build_info.render().len() as u64,
            Utc::now(),
        )
    }

    async fn resolve_file(&self, path: &DavPath) -> DavResult<(String, NzbFile)> {
        let entity = path
            .entity
            .as_deref()
            .ok_or_else(|| DavError::not_found("missing entity"))?;
        let file_name = path
            .file
            .as_deref()
            .ok_or_else(|| DavError::not_found("missing file"))?;
        let nzb = self
            .store
            .get_by_name(entity)
            .await
            .ok_or_else(|| DavError::not_found(format!("nzb '{entity}'")))?;
        let file = nzb
            .file(file_name)
            .cloned()
            .ok_or_else(|| DavError::not_found(format!("{entity}/{file_name}")))?;
        Ok((nzb.id, file))
    }
}

#[async_trait]
impl DavBackend for UsenetDavBackend {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn parents(&self) -> Vec<String> {
        vec!["__all__".to_owned(), "__bad__".to_owned()]
    }

    fn readiness(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    async fn open(&self, path: &DavPath) -> DavResult<DavNode> {
        let Some(parent) = path.parent.as_deref() else {
            let mut entries: Vec<FileInfo> = self
                .parents()
                .into_iter()
                .map(|name| FileInfo::dir(name, Utc::now()))
                .collect();
            entries.push(self.version_entry());
            return Ok(DavNode::Dir {
                name: self.provider.clone(),
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

        let listing = match parent {
            "__all__" => self.store.listing_all().await,
            "__bad__" => self.store.listing_bad().await,
            other => return Err(DavError::not_found(format!("parent '{other}'"))),
        };

        let Some(entity) = path.entity.as_deref() else {
            return Ok(DavNode::Dir {
                name: parent.to_owned(),
                entries: listing.as_ref().clone(),
                mod_time: Utc::now(),
            });
        };

        let nzb = self
            .store
            .get_by_name(entity)
            .await
            .ok_or_else(|| DavError::not_found(format!("nzb '{entity}'")))?;

        if path.file.is_none() {
            let entries: Vec<FileInfo> = nzb
                .files
                .iter()
                .filter(|file| !file.deleted)
                .map(|file| FileInfo::file(file.name.clone(), file.size, nzb.added_on))
                .collect();
            return Ok(DavNode::Dir {
                name: entity.to_owned(),
                entries,
                mod_time: nzb.added_on,
            });
        }

        let (_, file) = self.resolve_file(path).await?;
        Ok(DavNode::File {
            info: FileInfo::file(file.name.clone(), file.size, nzb.added_on),
            content_type: content_type_for(&file.name),
        })
    }

    async fn serve(&self, path: &DavPath, start: u64, end: u64) -> DavResult<ServeOutcome> {
        if path.parent.as_deref() == Some("version.txt") {
            return Ok(ServeOutcome::Preloaded(
                self.build_info.render().into_bytes(),
            ));
        }
        let (nzb_id, file) = self.resolve_file(path).await?;
        debug!(nzb_id = %nzb_id, file = %file.name, start, end, "streaming usenet range");

        let (read_half, mut write_half) = tokio::io::duplex(BODY_PIPE);
        let streamer = self.streamer.clone();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match streamer.stream(&file, start, end, &mut write_half).await {
                Ok(outcome) => {
                    trace!(bytes = outcome.bytes_written, "usenet stream complete");
                    if let Some(learned) = outcome.learned_segment_size {
                        let _ = store
                            .update_segment_size(&nzb_id, &file.name, learned)
                            .await;
                    }
                }
                Err(err) if err.is_client_disconnect() => {
                    trace!("client went away mid-stream");
                }
                Err(err) => {
                    debug!(error = %err, "usenet stream failed");
                }
            }
        });

        Ok(ServeOutcome::Stream(Body::from_stream(ReaderStream::new(
            read_half,
        ))))
    }

    async fn remove(&self, path: &DavPath) -> DavResult<()> {
        guard_removable(path)?;
        let entity = path.entity.as_deref().unwrap_or_default();
        let nzb = self
            .store
            .get_by_name(entity)
            .await
            .ok_or_else(|| DavError::not_found(format!("nzb '{entity}'")))?;

        if let Some(file_name) = path.file.as_deref() {
            return self
                .store
                .remove_file(&nzb.id, file_name)
                .await
                .map_err(|err| DavError::new(err.kind(), err.to_string()));
        }
        self.store
            .atomic_delete(&nzb.id)
            .await
            .map_err(|err| DavError::new(err.kind(), err.to_string()))
    }

    async fn bad_ids(&self) -> Vec<String> {
        let listing = self.store.listing_bad().await;
        let mut ids = Vec::new();
        for entry in listing.iter() {
            if let Some(nzb) = self.store.get_by_name(&entry.name).await {
                ids.push(nzb.id);
            }
        }
        ids
    }

    async fn remove_by_id(&self, id: &str) -> DavResult<()> {
        self.store
            .atomic_delete(id)
            .await
            .map_err(|err| DavError::new(err.kind(), err.to_string()))
    }
}
