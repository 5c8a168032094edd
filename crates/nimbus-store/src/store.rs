//! The persistent usenet store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use nimbus_core::FileInfo;
use nimbus_nzb::{Nzb, NzbStatus};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::rclone::RcloneNotifier;

/// Worker bound for the parallel filter scan.
const FILTER_WORKERS: usize = 10;

#[derive(Default)]
struct State {
    by_id: HashMap<String, Nzb>,
    name_to_id: HashMap<String, String>,
    queue: HashMap<String, Nzb>,
}

/// Store of NZB records for one usenet server.
pub struct UsenetStore {
    root: PathBuf,
    state: RwLock<State>,
    listing_all: RwLock<Arc<Vec<FileInfo>>>,
    listing_bad: RwLock<Arc<Vec<FileInfo>>>,
    rclone: Option<RcloneNotifier>,
}

impl UsenetStore {
    /// Create a store rooted at `<cache>/usenet`.
    #[must_use]
    pub fn new(root: PathBuf, rclone: Option<RcloneNotifier>) -> Self {
        Self {
            root,
            state: RwLock::new(State::default()),
            listing_all: RwLock::new(Arc::new(Vec::new())),
            listing_bad: RwLock::new(Arc::new(Vec::new())),
            rclone,
        }
    }

    /// Walk the cache directory and rebuild indices and listings.
    ///
    /// Malformed documents are skipped with a warning; they never fail the
    /// load.
    ///
    /// # Errors
    ///
    /// Only an unreadable root directory fails the load.
    pub async fn load(&self) -> StoreResult<usize> {
        let root = self.root.clone();
        let records = tokio::task::spawn_blocking(move || scan_records(&root))
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "store load task failed");
                Vec::new()
            });

        let loaded = records.len();
        {
            let mut state = self.state.write().await;
            state.by_id.clear();
            state.name_to_id.clear();
            for nzb in records {
                state.name_to_id.insert(nzb.name.clone(), nzb.id.clone());
                state.by_id.insert(nzb.id.clone(), nzb);
            }
        }
        self.rebuild_listings().await;
        info!(count = loaded, root = %self.root.display(), "usenet store loaded");
        Ok(loaded)
    }

    /// Persist and index a new record.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures; the in-memory state is only updated
    /// after the document is safely on disk.
    pub async fn add(&self, nzb: Nzb) -> StoreResult<()> {
        self.persist(&nzb)?;
        {
            let mut state = self.state.write().await;
            state.name_to_id.insert(nzb.name.clone(), nzb.id.clone());
            state.by_id.insert(nzb.id.clone(), nzb.clone());
        }
        self.rebuild_listings().await;
        self.notify_rclone(&nzb.category);
        Ok(())
    }

    /// Fetch a record by id.
    pub async fn get(&self, id: &str) -> Option<Nzb> {
        self.state.read().await.by_id.get(id).cloned()
    }

    /// Fetch a record through the name index.
    pub async fn get_by_name(&self, name: &str) -> Option<Nzb> {
        let state = self.state.read().await;
        let id = state.name_to_id.get(name)?;
        state.by_id.get(id).cloned()
    }

    /// Scan one category on disk for records in any of `statuses`.
    ///
    /// Documents are decoded on up to ten blocking workers; the scan stops
    /// early once `limit` matches have been collected.
    pub async fn filter(
        &self,
        category: &str,
        limit: usize,
        statuses: &[NzbStatus],
    ) -> Vec<Nzb> {
        let dir = self.root.join(category);
        let paths: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.path())
                    .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
                    .collect()
            })
            .unwrap_or_default();

        let statuses = statuses.to_vec();
        stream::iter(paths)
            .map(|path| {
                let statuses = statuses.clone();
                async move {
                    let decoded = tokio::task::spawn_blocking(move || decode_record(&path))
                        .await
                        .ok()
                        .flatten()?;
                    (statuses.is_empty() || statuses.contains(&decoded.status))
                        .then_some(decoded)
                }
            })
            .buffer_unordered(FILTER_WORKERS)
            .filter_map(|found| async move { found })
            .take(limit)
            .collect()
            .await
    }

    /// Place a record in the in-flight download queue.
    pub async fn enqueue(&self, mut nzb: Nzb) {
        nzb.status = NzbStatus::Queued;
        self.state.write().await.queue.insert(nzb.id.clone(), nzb);
    }

    /// Snapshot of the queue for schedulers.
    pub async fn queue_snapshot(&self) -> Vec<Nzb> {
        self.state.read().await.queue.values().cloned().collect()
    }

    /// Update a record's status.
    ///
    /// `Completed` stamps the completion time and full progress; `Failed`
    /// deletes the record atomically.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown ids; persistence failures
    /// propagate.
    pub async fn update_status(&self, id: &str, status: NzbStatus) -> StoreResult<()> {
        if status == NzbStatus::Failed {
            self.atomic_delete(id).await?;
            return Ok(());
        }
        let updated = {
            let mut state = self.state.write().await;
            let nzb = state
                .by_id
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_owned() })?;
            nzb.status = status;
            if status == NzbStatus::Completed {
                nzb.completed_on = Some(Utc::now());
                nzb.progress = 100;
                nzb.downloaded = true;
            }
            nzb.clone()
        };
        self.persist(&updated)?;
        self.rebuild_listings().await;
        Ok(())
    }

    /// Move a queued download into the persistent store.
    ///
    /// The queue entry is only removed once the document is on disk; a
    /// persistence failure re-inserts it unchanged.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the id is not queued; persistence
    /// failures propagate after the rollback.
    pub async fn mark_as_completed(&self, id: &str, storage: &str) -> StoreResult<()> {
        let original = {
            let mut state = self.state.write().await;
            state
                .queue
                .remove(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_owned() })?
        };

        let mut completed = original.clone();
        completed.status = NzbStatus::Completed;
        completed.completed_on = Some(Utc::now());
        completed.progress = 100;
        completed.downloaded = true;
        completed.storage = storage.to_owned();

        if let Err(err) = self.persist(&completed) {
            // Rollback: the queue must still own the download.
            self.state
                .write()
                .await
                .queue
                .insert(id.to_owned(), original);
            return Err(err);
        }

        {
            let mut state = self.state.write().await;
            state
                .name_to_id
                .insert(completed.name.clone(), completed.id.clone());
            state.by_id.insert(completed.id.clone(), completed.clone());
        }
        self.rebuild_listings().await;
        self.notify_rclone(&completed.category);
        Ok(())
    }

    /// Mark one logical file deleted without touching remote content.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown ids or file names.
    pub async fn remove_file(&self, id: &str, file_name: &str) -> StoreResult<()> {
        let updated = {
            let mut state = self.state.write().await;
            let nzb = state
                .by_id
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_owned() })?;
            let file = nzb
                .files
                .iter_mut()
                .find(|file| file.name == file_name)
                .ok_or_else(|| StoreError::NotFound {
                    id: format!("{id}/{file_name}"),
                })?;
            file.deleted = true;
            nzb.clone()
        };
        self.persist(&updated)?;
        self.rebuild_listings().await;
        Ok(())
    }

    /// Persist a segment size learned from a header fetch at stream time.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown ids or file names.
    pub async fn update_segment_size(
        &self,
        id: &str,
        file_name: &str,
        segment_size: u64,
    ) -> StoreResult<()> {
        let updated = {
            let mut state = self.state.write().await;
            let nzb = state
                .by_id
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_owned() })?;
            let file = nzb
                .files
                .iter_mut()
                .find(|file| file.name == file_name)
                .ok_or_else(|| StoreError::NotFound {
                    id: format!("{id}/{file_name}"),
                })?;
            file.segment_size = segment_size;
            nzb.clone()
        };
        self.persist(&updated)
    }

    /// Mark a record bad so it surfaces under `__bad__`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for unknown ids.
    pub async fn mark_bad(&self, id: &str) -> StoreResult<()> {
        let updated = {
            let mut state = self.state.write().await;
            let nzb = state
                .by_id
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_owned() })?;
            nzb.is_bad = true;
            nzb.clone()
        };
        self.persist(&updated)?;
        self.rebuild_listings().await;
        Ok(())
    }

    /// Remove a record everywhere: queue, indices, listings, then disk.
    ///
    /// Deleting an id that does not exist is a no-op. The document moves to
    /// `trash/` rather than being unlinked.
    ///
    /// # Errors
    ///
    /// Only the trash move can fail.
    pub async fn atomic_delete(&self, id: &str) -> StoreResult<()> {
        let removed = {
            let mut state = self.state.write().await;
            state.queue.remove(id);
            let removed = state.by_id.remove(id);
            if let Some(nzb) = &removed {
                state.name_to_id.remove(&nzb.name);
            }
            removed
        };
        self.rebuild_listings().await;

        let Some(nzb) = removed else {
            debug!(id, "delete of unknown nzb is a no-op");
            return Ok(());
        };

        let source = self.record_path(&nzb.category, id);
        if source.exists() {
            let trash_dir = self.root.join("trash");
            std::fs::create_dir_all(&trash_dir).map_err(|err| StoreError::Io {
                path: trash_dir.clone(),
                source: err,
            })?;
            let target = trash_dir.join(format!("{id}.json"));
            std::fs::rename(&source, &target).map_err(|err| StoreError::Io {
                path: source,
                source: err,
            })?;
        }
        self.notify_rclone(&nzb.category);
        Ok(())
    }

    /// Current `__all__` listing snapshot.
    pub async fn listing_all(&self) -> Arc<Vec<FileInfo>> {
        Arc::clone(&*self.listing_all.read().await)
    }

    /// Current `__bad__` listing snapshot.
    pub async fn listing_bad(&self) -> Arc<Vec<FileInfo>> {
        Arc::clone(&*self.listing_bad.read().await)
    }

    /// Number of resident records.
    pub async fn len(&self) -> usize {
        self.state.read().await.by_id.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn record_path(&self, category: &str, id: &str) -> PathBuf {
        self.root.join(category).join(format!("{id}.json"))
    }

    fn persist(&self, nzb: &Nzb) -> StoreResult<()> {
        let dir = self.root.join(&nzb.category);
        std::fs::create_dir_all(&dir).map_err(|err| StoreError::Io {
            path: dir.clone(),
            source: err,
        })?;
        let path = self.record_path(&nzb.category, &nzb.id);
        let body = serde_json::to_vec(nzb).map_err(|err| StoreError::Codec {
            path: path.clone(),
            source: err,
        })?;
        std::fs::write(&path, body).map_err(|err| StoreError::Io { path, source: err })
    }

    async fn rebuild_listings(&self) {
        let (all, bad) = {
            let state = self.state.read().await;
            let mut all: Vec<FileInfo> = state
                .by_id
                .values()
                .map(|nzb| FileInfo::dir(nzb.name.clone(), nzb.added_on))
                .collect();
            let mut bad: Vec<FileInfo> = state
                .by_id
                .values()
                .filter(|nzb| nzb.is_bad)
                .map(|nzb| FileInfo::dir(nzb.name.clone(), nzb.added_on))
                .collect();
            sort_listing(&mut all);
            sort_listing(&mut bad);
            (all, bad)
        };
        *self.listing_all.write().await = Arc::new(all);
        *self.listing_bad.write().await = Arc::new(bad);
    }

    fn notify_rclone(&self, category: &str) {
        if let Some(rclone) = &self.rclone {
            let rclone = rclone.clone();
            let dir = category.to_owned();
            tokio::spawn(async move {
                rclone.invalidate(&dir).await;
            });
        }
    }
}

fn sort_listing(listing: &mut [FileInfo]) {
    listing.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.mod_time.cmp(&b.mod_time))
    });
}

fn scan_records(root: &Path) -> Vec<Nzb> {
    let mut records = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        if path
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|dir| dir == "trash")
        {
            continue;
        }
        if let Some(nzb) = decode_record(path) {
            records.push(nzb);
        }
    }
    records
}

fn decode_record(path: &Path) -> Option<Nzb> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unreadable nzb record");
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(nzb) => Some(nzb),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping malformed nzb record");
            None
        }
    }
}
