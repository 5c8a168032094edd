//! Per-provider torrent cache.
//!
//! Mirrors the usenet store: one JSON document per torrent on disk (moved
//! to `trash/` on deletion), name and id indices in memory, and derived
//! listings recomputed lazily behind a dirty flag. Multiple torrent ids can
//! resolve to the same virtual folder; their file maps are merged and
//! pruned symmetrically on deletion.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use nimbus_config::{CheckPolicy, FilterOp, FolderNaming, VirtualFolderConfig};
use nimbus_core::FileInfo;
use nimbus_telemetry::Metrics;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::accounts::Accounts;
use crate::client::DebridClient;
use crate::error::{DebridError, DebridResult, InvalidReason};
use crate::model::{CachedTorrent, DownloadLink, Torrent, TorrentFile, folder_name_for};
use crate::repair::{RepairKind, RepairRequest, spawn_worker};

/// Poll interval while waiting on another caller's in-flight resolution.
const SINGLEFLIGHT_POLL: Duration = Duration::from_millis(50);
/// Progress logging cadence during sync.
const SYNC_PROGRESS_EVERY: usize = 1_000;
/// Queue depth for the repair channel.
const REPAIR_QUEUE: usize = 64;

/// Construction options, derived from one provider's configuration.
#[derive(Clone)]
pub struct CacheOptions {
    /// Provider name; also the WebDAV path segment.
    pub provider: String,
    /// Directory holding `<id>.json` documents.
    pub dir: PathBuf,
    /// Folder naming policy.
    pub folder_naming: FolderNaming,
    /// Worker bound for sync fan-out.
    pub workers: usize,
    /// How long resolved links stay cached.
    pub link_expiry: chrono::Duration,
    /// Broken-torrent detection granularity.
    pub check_policy: CheckPolicy,
    /// Custom folder views.
    pub custom_folders: Vec<VirtualFolderConfig>,
    /// Interval between full torrent refreshes.
    pub torrent_refresh: Duration,
    /// Interval between download-link maintenance passes.
    pub link_refresh: Duration,
    /// Redirect plain streams to rclone instead of proxying.
    pub serve_from_rclone: bool,
}

#[derive(Default)]
struct CacheState {
    by_name: HashMap<String, CachedTorrent>,
    by_id: HashMap<String, String>,
}

struct Listings {
    dirty: bool,
    all: Arc<Vec<FileInfo>>,
    bad: Arc<Vec<FileInfo>>,
    torrents: Arc<Vec<FileInfo>>,
    custom: HashMap<String, Arc<Vec<FileInfo>>>,
}

impl Default for Listings {
    fn default() -> Self {
        Self {
            dirty: true,
            all: Arc::new(Vec::new()),
            bad: Arc::new(Vec::new()),
            torrents: Arc::new(Vec::new()),
            custom: HashMap::new(),
        }
    }
}

/// Cache of one provider's torrents.
pub struct TorrentCache {
    options: CacheOptions,
    client: Arc<dyn DebridClient>,
    accounts: Arc<Accounts>,
    metrics: Metrics,
    state: RwLock<CacheState>,
    listings: Mutex<Listings>,
    invalid_links: StdMutex<HashSet<String>>,
    inflight_links: Mutex<HashSet<String>>,
    inflight_repairs: Mutex<HashSet<String>>,
    repair_blacklist: StdMutex<HashSet<String>>,
    repair_tx: mpsc::Sender<RepairRequest>,
    repair_rx: Mutex<Option<mpsc::Receiver<RepairRequest>>>,
    ready_tx: watch::Sender<bool>,
}

impl TorrentCache {
    /// Construct a cache; call [`Self::sync`] before serving.
    #[must_use]
    pub fn new(
        options: CacheOptions,
        client: Arc<dyn DebridClient>,
        accounts: Arc<Accounts>,
        metrics: Metrics,
    ) -> Arc<Self> {
        let (repair_tx, repair_rx) = mpsc::channel(REPAIR_QUEUE);
        let (ready_tx, _) = watch::channel(false);
        Arc::new(Self {
            options,
            client,
            accounts,
            metrics,
            state: RwLock::new(CacheState::default()),
            listings: Mutex::new(Listings::default()),
            invalid_links: StdMutex::new(HashSet::new()),
            inflight_links: Mutex::new(HashSet::new()),
            inflight_repairs: Mutex::new(HashSet::new()),
            repair_blacklist: StdMutex::new(HashSet::new()),
            repair_tx,
            repair_rx: Mutex::new(Some(repair_rx)),
            ready_tx,
        })
    }

    /// Provider name.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.options.provider
    }

    /// Whether plain streams should redirect to rclone.
    #[must_use]
    pub const fn serve_from_rclone(&self) -> bool {
        self.options.serve_from_rclone
    }

    /// Names of the configured custom folders.
    #[must_use]
    pub fn custom_folder_names(&self) -> Vec<String> {
        self.options
            .custom_folders
            .iter()
            .map(|folder| folder.name.clone())
            .collect()
    }

    /// Shared metrics handle.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Readiness signal; closes over `true` once the initial sync is done.
    #[must_use]
    pub fn ready_receiver(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Start the serial repair worker. Call once.
    ///
    /// # Panics
    ///
    /// Panics when called twice; the receiver is consumed on first use.
    pub async fn start_repair_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let receiver = self
            .repair_rx
            .lock()
            .await
            .take()
            .expect("repair worker already started");
        spawn_worker(Arc::clone(self), receiver)
    }

    /// Queue a repair without blocking.
    pub fn queue_repair(&self, kind: RepairKind, torrent_id: &str) {
        let request = RepairRequest {
            kind,
            torrent_id: torrent_id.to_owned(),
        };
        if self.repair_tx.try_send(request).is_err() {
            warn!(torrent_id, "repair queue full; request dropped");
        }
    }

    /// Spawn the per-cache refresh schedulers.
    pub fn spawn_schedulers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let torrent_cache = Arc::clone(self);
        let torrents = tokio::spawn(async move {
            let mut tick = tokio::time::interval(torrent_cache.options.torrent_refresh);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                if let Err(err) = torrent_cache.sync().await {
                    warn!(provider = %torrent_cache.provider(), error = %err, "scheduled sync failed");
                }
            }
        });

        let link_cache = Arc::clone(self);
        let links = tokio::spawn(async move {
            let mut tick = tokio::time::interval(link_cache.options.link_refresh);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                link_cache.refresh_accounts().await;
            }
        });
        vec![torrents, links]
    }

    /// Refresh account profiles and disable accounts whose token fails.
    pub async fn refresh_accounts(&self) {
        for account in self.accounts.all() {
            if !account.is_enabled() {
                continue;
            }
            match self.client.get_profile(&account.token).await {
                Ok(profile) => {
                    account.record_profile(&profile.username, profile.traffic_used);
                }
                Err(DebridError::Auth) => {
                    warn!(provider = %self.provider(), account = account.id, "token rejected; disabling account");
                    self.accounts.disable(account.id);
                }
                Err(err) => {
                    debug!(provider = %self.provider(), account = account.id, error = %err, "profile refresh failed");
                }
            }
        }
    }

    /// Full cache synchronisation against the provider.
    ///
    /// Loads complete on-disk records, fetches the authoritative list,
    /// validates disappeared ids with direct gets, and admits additions
    /// through bounded workers.
    ///
    /// # Errors
    ///
    /// Only the authoritative list fetch fails the sync; individual
    /// torrents degrade to warnings.
    pub async fn sync(self: &Arc<Self>) -> DebridResult<()> {
        let disk = self.load_from_disk().await;
        {
            let mut state = self.state.write().await;
            if state.by_name.is_empty() {
                for cached in disk {
                    insert_into_state(&mut state, cached, self.options.folder_naming);
                }
            }
        }
        self.mark_listings_dirty().await;

        let account = self.accounts.current().ok_or(DebridError::NoEnabledAccount)?;
        let remote = self.client.get_torrents(&account.token).await?;
        info!(provider = %self.provider(), remote = remote.len(), "torrent list fetched");

        let (added, deleted) = {
            let state = self.state.read().await;
            let remote_ids: HashSet<&str> = remote.iter().map(|t| t.id.as_str()).collect();
            let added: Vec<Torrent> = remote
                .iter()
                .filter(|torrent| !state.by_id.contains_key(&torrent.id))
                .cloned()
                .collect();
            let deleted: Vec<String> = state
                .by_id
                .keys()
                .filter(|id| !remote_ids.contains(id.as_str()))
                .cloned()
                .collect();
            (added, deleted)
        };

        for id in deleted {
            // Only torrents the API confirms gone are dropped locally.
            match self.client.get_torrent(&account.token, &id).await {
                Err(DebridError::NotFound { .. }) => {
                    debug!(provider = %self.provider(), torrent_id = %id, "torrent gone upstream");
                    self.remove_id(&id).await;
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(provider = %self.provider(), torrent_id = %id, error = %err, "deletion validation failed");
                }
            }
        }

        let total = added.len();
        let processed = std::sync::atomic::AtomicUsize::new(0);
        stream::iter(added)
            .map(|torrent| {
                let cache = Arc::clone(self);
                let token = account.token.clone();
                let processed = &processed;
                async move {
                    cache.process_torrent(&token, torrent).await;
                    let done = processed.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                    if done % SYNC_PROGRESS_EVERY == 0 {
                        info!(provider = %cache.provider(), done, total, "sync progress");
                    }
                }
            })
            .buffer_unordered(self.options.workers.max(1))
            .collect::<Vec<()>>()
            .await;

        self.mark_listings_dirty().await;
        let count = self.state.read().await.by_id.len();
        self.metrics
            .set_cached_torrents(i64::try_from(count).unwrap_or(i64::MAX));
        let _ = self.ready_tx.send(true);
        info!(provider = %self.provider(), count, "sync complete");
        Ok(())
    }

    /// Admit one torrent: incomplete ones get a single refresh attempt.
    async fn process_torrent(&self, token: &str, torrent: Torrent) {
        let torrent = if torrent.is_complete() {
            torrent
        } else {
            match self.client.update_torrent(token, &torrent).await {
                Ok(updated) if updated.is_complete() => updated,
                Ok(_) | Err(_) => {
                    debug!(provider = %self.provider(), torrent_id = %torrent.id, "torrent still incomplete; skipped");
                    return;
                }
            }
        };
        self.insert_cached(CachedTorrent::new(torrent)).await;
    }

    /// Insert a torrent, applying the folder merge rule.
    pub async fn insert_cached(&self, cached: CachedTorrent) {
        {
            let mut state = self.state.write().await;
            insert_into_state(&mut state, cached.clone(), self.options.folder_naming);
        }
        self.persist(&cached);
        self.mark_listings_dirty().await;
    }

    /// Remove one id, pruning its files from the folder entry.
    pub async fn remove_id(&self, torrent_id: &str) {
        let removed_folder = {
            let mut state = self.state.write().await;
            let Some(folder) = state.by_id.remove(torrent_id) else {
                return;
            };
            let remove_entry = if let Some(entry) = state.by_name.get_mut(&folder) {
                entry
                    .torrent
                    .files
                    .retain(|_, file| file.torrent_id != torrent_id);
                entry.torrent.files.is_empty()
            } else {
                false
            };
            if remove_entry {
                state.by_name.remove(&folder);
            }
            folder
        };
        self.trash(torrent_id);
        self.mark_listings_dirty().await;
        debug!(provider = %self.provider(), torrent_id, folder = %removed_folder, "torrent removed from cache");
    }

    /// WebDAV delete entry point: remove locally and upstream.
    ///
    /// # Errors
    ///
    /// Local removal always succeeds; the upstream delete is best-effort
    /// and only auth failures surface.
    pub async fn on_remove(&self, torrent_id: &str) -> DebridResult<()> {
        if let Some(account) = self.accounts.current() {
            match self.client.delete_torrent(&account.token, torrent_id).await {
                Ok(()) | Err(DebridError::NotFound { .. }) => {}
                Err(DebridError::Auth) => return Err(DebridError::Auth),
                Err(err) => {
                    debug!(torrent_id, error = %err, "upstream delete failed");
                }
            }
        }
        self.remove_id(torrent_id).await;
        Ok(())
    }

    /// Folder names for ids currently listed as bad.
    pub async fn bad_torrent_ids(&self) -> Vec<String> {
        let state = self.state.read().await;
        state
            .by_name
            .values()
            .filter(|cached| cached.bad)
            .map(|cached| cached.torrent.id.clone())
            .collect()
    }

    /// Resolve a torrent folder by name.
    pub async fn torrent_by_folder(&self, folder: &str) -> Option<CachedTorrent> {
        self.state.read().await.by_name.get(folder).cloned()
    }

    /// Resolve a folder by torrent id.
    pub async fn torrent_by_id(&self, torrent_id: &str) -> Option<CachedTorrent> {
        let state = self.state.read().await;
        let folder = state.by_id.get(torrent_id)?;
        state.by_name.get(folder).cloned()
    }

    /// One file of a folder by name, hiding deleted entries.
    pub async fn file(&self, folder: &str, file_name: &str) -> Option<TorrentFile> {
        let state = self.state.read().await;
        let entry = state.by_name.get(folder)?;
        entry
            .torrent
            .files
            .get(file_name)
            .filter(|file| !file.deleted)
            .cloned()
    }

    /// Mark one logical file deleted.
    pub async fn remove_file(&self, folder: &str, file_name: &str) -> bool {
        let updated = {
            let mut state = self.state.write().await;
            let Some(entry) = state.by_name.get_mut(folder) else {
                return false;
            };
            let Some(file) = entry.torrent.files.get_mut(file_name) else {
                return false;
            };
            file.deleted = true;
            entry.clone()
        };
        self.persist(&updated);
        self.mark_listings_dirty().await;
        true
    }

    /// Listing for a parent (`__all__`, `__bad__`, `torrents`, custom).
    pub async fn listing(&self, parent: &str) -> Option<Arc<Vec<FileInfo>>> {
        let mut listings = self.listings.lock().await;
        if listings.dirty {
            let state = self.state.read().await;
            rebuild_listings(&mut listings, &state, &self.options.custom_folders);
            listings.dirty = false;
        }
        match parent {
            "__all__" => Some(Arc::clone(&listings.all)),
            "__bad__" => Some(Arc::clone(&listings.bad)),
            "torrents" => Some(Arc::clone(&listings.torrents)),
            other => listings.custom.get(other).map(Arc::clone),
        }
    }

    /// Files of one folder as listing entries.
    pub async fn folder_listing(&self, folder: &str) -> Option<Vec<FileInfo>> {
        let state = self.state.read().await;
        let entry = state.by_name.get(folder)?;
        let mut files: Vec<FileInfo> = entry
            .torrent
            .files
            .values()
            .filter(|file| !file.deleted)
            .map(|file| FileInfo::file(file.name.clone(), file.size, entry.added_on))
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Some(files)
    }

    /// Resolve a usable direct download link for one file.
    ///
    /// Cached per account with single-flight per restricted link; empty
    /// links refresh the torrent and, failing that, re-insert it.
    ///
    /// # Errors
    ///
    /// `TrafficExceeded` propagates; `HosterUnavailable` is retried once
    /// after a re-insert; auth and not-found errors surface directly.
    pub async fn get_download_link(
        &self,
        folder: &str,
        file_name: &str,
        restricted_link: &str,
    ) -> DebridResult<DownloadLink> {
        let key = self.client.link_cache_key(restricted_link).to_owned();
        loop {
            let account = self.accounts.current().ok_or(DebridError::NoEnabledAccount)?;
            if let Some(cached) = account.cached_link(&key) {
                if !self.is_invalid(&cached.download_link) {
                    return Ok(cached);
                }
                account.evict_link(&key);
            }

            // Single-flight: exactly one resolver per restricted link; the
            // others poll the account cache the resolver fills.
            {
                let mut inflight = self.inflight_links.lock().await;
                if inflight.contains(&key) {
                    drop(inflight);
                    tokio::time::sleep(SINGLEFLIGHT_POLL).await;
                    continue;
                }
                inflight.insert(key.clone());
            }

            let resolved = self
                .resolve_link(account.id, folder, file_name, &key)
                .await;
            self.inflight_links.lock().await.remove(&key);
            return resolved;
        }
    }

    async fn resolve_link(
        &self,
        account_id: usize,
        folder: &str,
        file_name: &str,
        key: &str,
    ) -> DebridResult<DownloadLink> {
        let account = self
            .accounts
            .by_id(account_id)
            .ok_or(DebridError::NoEnabledAccount)?;

        let mut attempted_reinsert = false;
        loop {
            let (torrent, file) = self.lookup_live_file(folder, file_name).await?;

            let file = if file.link.is_empty() {
                // A missing restricted link means the provider state is
                // stale; refresh first, re-insert as the last resort.
                self.refresh_torrent(&account.token, &file.torrent_id).await;
                match self.lookup_live_file(folder, file_name).await {
                    Ok((_, fresh)) if !fresh.link.is_empty() => fresh,
                    _ if !attempted_reinsert => {
                        attempted_reinsert = true;
                        self.reinsert_torrent(&file.torrent_id).await?;
                        continue;
                    }
                    _ => {
                        return Err(DebridError::NotFound {
                            id: format!("{folder}/{file_name}"),
                        });
                    }
                }
            } else {
                file
            };

            match self
                .client
                .get_download_link(&account.token, &torrent.torrent, &file)
                .await
            {
                Ok(mut link) => {
                    link.expires_at = Utc::now() + self.options.link_expiry;
                    link.account_id = account.id;
                    account.cache_link(key, link.clone());
                    self.metrics.inc_download_link_issued();
                    return Ok(link);
                }
                Err(DebridError::HosterUnavailable) if !attempted_reinsert => {
                    attempted_reinsert = true;
                    self.reinsert_torrent(&file.torrent_id).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn lookup_live_file(
        &self,
        folder: &str,
        file_name: &str,
    ) -> DebridResult<(CachedTorrent, TorrentFile)> {
        let state = self.state.read().await;
        let entry = state
            .by_name
            .get(folder)
            .ok_or_else(|| DebridError::NotFound {
                id: folder.to_owned(),
            })?;
        let file = entry
            .torrent
            .files
            .get(file_name)
            .filter(|file| !file.deleted)
            .cloned()
            .ok_or_else(|| DebridError::NotFound {
                id: format!("{folder}/{file_name}"),
            })?;
        Ok((entry.clone(), file))
    }

    async fn refresh_torrent(&self, token: &str, torrent_id: &str) {
        match self.client.get_torrent(token, torrent_id).await {
            Ok(torrent) => {
                self.insert_cached(CachedTorrent::new(torrent)).await;
            }
            Err(err) => {
                debug!(torrent_id, error = %err, "torrent refresh failed");
            }
        }
    }

    /// Invalidate a direct link, disabling the issuing account when the
    /// reason is exhausted bandwidth.
    pub fn mark_link_invalid(&self, link: &DownloadLink, reason: InvalidReason) {
        self.invalid_links
            .lock()
            .expect("invalid set lock")
            .insert(link.download_link.clone());
        info!(reason = reason.as_str(), account = link.account_id, "download link invalidated");
        if reason == InvalidReason::BandwidthExceeded {
            self.accounts.disable(link.account_id);
        }
    }

    fn is_invalid(&self, download_link: &str) -> bool {
        self.invalid_links
            .lock()
            .expect("invalid set lock")
            .contains(download_link)
    }

    /// Remaining torrent slots on the active account.
    ///
    /// # Errors
    ///
    /// Propagates provider failures; `NoEnabledAccount` when rotation is
    /// exhausted.
    pub async fn available_slots(&self) -> DebridResult<usize> {
        let account = self.accounts.current().ok_or(DebridError::NoEnabledAccount)?;
        self.client.get_available_slots(&account.token).await
    }

    /// Submit a magnet and poll it to completeness.
    ///
    /// Used by the import intake; the caller decides whether the completed
    /// torrent enters the cache.
    ///
    /// # Errors
    ///
    /// Non-retryable provider errors surface immediately; a torrent that
    /// never completes within the attempt budget maps to a gateway-timeout
    /// API error.
    pub async fn import_magnet(
        &self,
        magnet: &str,
        download_uncached: bool,
        poll: Duration,
        attempts: u32,
    ) -> DebridResult<Torrent> {
        let account = self.accounts.current().ok_or(DebridError::NoEnabledAccount)?;
        let torrent_id = self.client.submit_magnet(&account.token, magnet).await?;
        for _ in 0..attempts {
            match self
                .client
                .check_status(&account.token, &torrent_id, download_uncached)
                .await
            {
                Ok(torrent) if torrent.is_complete() => return Ok(torrent),
                Ok(_) => {}
                Err(err) if !err.retryable() => return Err(err),
                Err(err) => {
                    debug!(torrent_id = %torrent_id, error = %err, "magnet poll failed");
                }
            }
            tokio::time::sleep(poll).await;
        }
        Err(DebridError::Api {
            status: 504,
            message: format!("magnet '{torrent_id}' did not complete in time"),
        })
    }

    /// Re-insert a broken torrent from its reconstructed magnet.
    ///
    /// Single-flighted per id; ids that already failed stay blacklisted.
    /// On success the new torrent replaces the old one atomically under the
    /// same folder.
    ///
    /// # Errors
    ///
    /// Failures mark the cached torrent bad and blacklist the id.
    pub async fn reinsert_torrent(&self, torrent_id: &str) -> DebridResult<String> {
        if self
            .repair_blacklist
            .lock()
            .expect("blacklist lock")
            .contains(torrent_id)
        {
            return Err(DebridError::Repair {
                torrent_id: torrent_id.to_owned(),
                detail: "previous re-insert failed".to_owned(),
            });
        }
        {
            let mut inflight = self.inflight_repairs.lock().await;
            if !inflight.insert(torrent_id.to_owned()) {
                return Err(DebridError::Repair {
                    torrent_id: torrent_id.to_owned(),
                    detail: "re-insert already in flight".to_owned(),
                });
            }
        }
        let result = self.reinsert_inner(torrent_id).await;
        self.inflight_repairs.lock().await.remove(torrent_id);
        if result.is_err() {
            self.repair_blacklist
                .lock()
                .expect("blacklist lock")
                .insert(torrent_id.to_owned());
            self.mark_bad(torrent_id).await;
        }
        result
    }

    async fn reinsert_inner(&self, torrent_id: &str) -> DebridResult<String> {
        let account = self.accounts.current().ok_or(DebridError::NoEnabledAccount)?;
        let cached = self
            .torrent_by_id(torrent_id)
            .await
            .ok_or_else(|| DebridError::NotFound {
                id: torrent_id.to_owned(),
            })?;

        let magnet = format!(
            "magnet:?xt=urn:btih:{}&dn={}",
            cached.torrent.info_hash,
            urlencoding::encode(&cached.torrent.name)
        );
        let new_id = self.client.submit_magnet(&account.token, &magnet).await?;

        match self.client.check_status(&account.token, &new_id, false).await {
            Ok(torrent) if torrent.is_complete() => {
                self.insert_cached(CachedTorrent::new(torrent)).await;
                if new_id != torrent_id {
                    self.remove_id(torrent_id).await;
                }
                self.repair_blacklist
                    .lock()
                    .expect("blacklist lock")
                    .remove(torrent_id);
                Ok(new_id)
            }
            Ok(_) => {
                let _ = self.client.delete_torrent(&account.token, &new_id).await;
                Err(DebridError::Repair {
                    torrent_id: torrent_id.to_owned(),
                    detail: "re-inserted torrent is incomplete".to_owned(),
                })
            }
            Err(err) => {
                let _ = self.client.delete_torrent(&account.token, &new_id).await;
                Err(DebridError::Repair {
                    torrent_id: torrent_id.to_owned(),
                    detail: err.to_string(),
                })
            }
        }
    }

    async fn mark_bad(&self, torrent_id: &str) {
        let updated = {
            let mut state = self.state.write().await;
            let Some(folder) = state.by_id.get(torrent_id).cloned() else {
                return;
            };
            let Some(entry) = state.by_name.get_mut(&folder) else {
                return;
            };
            entry.bad = true;
            entry.clone()
        };
        self.persist(&updated);
        self.mark_listings_dirty().await;
    }

    /// Probe a folder's files for dead links.
    ///
    /// Per-file policy checks every live file; per-torrent short-circuits
    /// on the first broken one by dropping the remaining probes.
    pub async fn is_torrent_broken(&self, folder: &str) -> DebridResult<bool> {
        let account = self.accounts.current().ok_or(DebridError::NoEnabledAccount)?;
        let Some(cached) = self.torrent_by_folder(folder).await else {
            return Err(DebridError::NotFound {
                id: folder.to_owned(),
            });
        };
        let files: Vec<TorrentFile> = cached
            .torrent
            .files
            .values()
            .filter(|file| !file.deleted)
            .cloned()
            .collect();

        match self.options.check_policy {
            CheckPolicy::PerFile => {
                let mut broken = false;
                for file in files {
                    if self.is_file_broken(&account.token, &file).await {
                        broken = true;
                    }
                }
                Ok(broken)
            }
            CheckPolicy::PerTorrent => {
                let mut probes = stream::iter(files)
                    .map(|file| {
                        let token = account.token.clone();
                        async move { self.is_file_broken(&token, &file).await }
                    })
                    .buffer_unordered(4);
                while let Some(broken) = probes.next().await {
                    if broken {
                        // Dropping the stream cancels the remaining probes.
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    async fn is_file_broken(&self, token: &str, file: &TorrentFile) -> bool {
        let link = if file.link.is_empty() {
            self.refresh_torrent(token, &file.torrent_id).await;
            let refreshed = self
                .torrent_by_id(&file.torrent_id)
                .await
                .and_then(|cached| cached.torrent.files.get(&file.name).cloned())
                .map(|fresh| fresh.link)
                .unwrap_or_default();
            if refreshed.is_empty() {
                return true;
            }
            refreshed
        } else {
            file.link.clone()
        };
        matches!(
            self.client.check_link(token, &link).await,
            Err(DebridError::HosterUnavailable)
        )
    }

    async fn mark_listings_dirty(&self) {
        self.listings.lock().await.dirty = true;
    }

    async fn load_from_disk(&self) -> Vec<CachedTorrent> {
        let dir = self.options.dir.clone();
        tokio::task::spawn_blocking(move || {
            let mut records = Vec::new();
            let Ok(entries) = std::fs::read_dir(&dir) else {
                return records;
            };
            for entry in entries.filter_map(Result::ok) {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let Ok(raw) = std::fs::read(&path) else {
                    continue;
                };
                match serde_json::from_slice::<CachedTorrent>(&raw) {
                    Ok(mut cached) => {
                        // Only complete torrents with clean names survive a
                        // reload; the rest re-sync from the API.
                        cached.torrent.name =
                            nimbus_core::sanitize_file_name(&cached.torrent.name);
                        if cached.torrent.is_complete() && !cached.torrent.name.is_empty() {
                            records.push(cached);
                        }
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping malformed torrent record");
                    }
                }
            }
            records
        })
        .await
        .unwrap_or_default()
    }

    fn persist(&self, cached: &CachedTorrent) {
        if std::fs::create_dir_all(&self.options.dir).is_err() {
            return;
        }
        let path = self
            .options
            .dir
            .join(format!("{}.json", cached.torrent.id));
        // Indented for human inspection, unlike the usenet store.
        match serde_json::to_vec_pretty(cached) {
            Ok(body) => {
                if let Err(err) = std::fs::write(&path, body) {
                    warn!(path = %path.display(), error = %err, "torrent persist failed");
                }
            }
            Err(err) => warn!(error = %err, "torrent encode failed"),
        }
    }

    fn trash(&self, torrent_id: &str) {
        let source = self.options.dir.join(format!("{torrent_id}.json"));
        if !source.exists() {
            return;
        }
        let trash_dir = self.options.dir.join("trash");
        if std::fs::create_dir_all(&trash_dir).is_err() {
            return;
        }
        let target = trash_dir.join(format!("{torrent_id}.json"));
        if let Err(err) = std::fs::rename(&source, &target) {
            warn!(torrent_id, error = %err, "trash move failed");
        }
    }
}

/// Apply the merge rule: same folder, different id merges file maps.
fn insert_into_state(state: &mut CacheState, cached: CachedTorrent, naming: FolderNaming) {
    let folder = folder_name_for(&cached.torrent, naming);
    let new_id = cached.torrent.id.clone();

    match state.by_name.get_mut(&folder) {
        Some(existing) if existing.torrent.id != new_id => {
            // Keep the other ids' files, overwrite with the new torrent's.
            let mut merged: HashMap<String, TorrentFile> = existing
                .torrent
                .files
                .iter()
                .filter(|(_, file)| file.torrent_id != new_id)
                .map(|(name, file)| (name.clone(), file.clone()))
                .collect();
            for (name, file) in cached.torrent.files {
                merged.insert(name, file);
            }
            existing.torrent.files = merged;
            existing.torrent.id = new_id.clone();
            existing.is_complete = existing.torrent.is_complete();
        }
        Some(existing) => {
            // Same id: plain replacement, never a self-merge.
            *existing = cached;
        }
        None => {
            state.by_name.insert(folder.clone(), cached);
        }
    }
    state.by_id.insert(new_id, folder);
}

fn rebuild_listings(
    listings: &mut Listings,
    state: &CacheState,
    custom_folders: &[VirtualFolderConfig],
) {
    let mut all: Vec<FileInfo> = state
        .by_name
        .values()
        .map(|cached| FileInfo::dir(folder_key(state, cached), cached.added_on))
        .collect();
    sort_listing(&mut all);

    let mut bad: Vec<FileInfo> = state
        .by_name
        .values()
        .filter(|cached| cached.bad)
        .map(|cached| FileInfo::dir(folder_key(state, cached), cached.added_on))
        .collect();
    sort_listing(&mut bad);

    let mut torrents: Vec<FileInfo> = state
        .by_name
        .values()
        .map(|cached| FileInfo::dir(folder_key(state, cached), cached.added_on))
        .collect();
    sort_listing(&mut torrents);

    let mut custom = HashMap::new();
    for folder in custom_folders {
        let mut entries: Vec<FileInfo> = state
            .by_name
            .values()
            .filter(|cached| {
                cached
                    .torrent
                    .files
                    .values()
                    .filter(|file| !file.deleted)
                    .any(|file| matches_filters(&folder.filters, file, cached))
            })
            .map(|cached| FileInfo::dir(folder_key(state, cached), cached.added_on))
            .collect();
        sort_listing(&mut entries);
        custom.insert(folder.name.clone(), Arc::new(entries));
    }

    listings.all = Arc::new(all);
    listings.bad = Arc::new(bad);
    listings.torrents = Arc::new(torrents);
    listings.custom = custom;
}

/// Recover the folder key for a cached entry via its id.
fn folder_key(state: &CacheState, cached: &CachedTorrent) -> String {
    state
        .by_id
        .get(&cached.torrent.id)
        .cloned()
        .unwrap_or_else(|| cached.torrent.name.clone())
}

/// All filters must match (conjunction), names case-insensitively.
fn matches_filters(
    filters: &[nimbus_config::FolderFilter],
    file: &TorrentFile,
    cached: &CachedTorrent,
) -> bool {
    filters.iter().all(|filter| {
        let name = file.name.to_lowercase();
        let value = filter.value.to_lowercase();
        match filter.op {
            FilterOp::Include => name.contains(&value),
            FilterOp::Exclude => !name.contains(&value),
            FilterOp::StartsWith => name.starts_with(&value),
            FilterOp::EndsWith => name.ends_with(&value),
            FilterOp::ExactMatch => name == value,
            FilterOp::Regex => regex::Regex::new(&filter.value)
                .map(|pattern| pattern.is_match(&file.name))
                .unwrap_or(false),
            FilterOp::SizeGt => filter
                .value
                .parse::<u64>()
                .is_ok_and(|threshold| file.size > threshold),
            FilterOp::SizeLt => filter
                .value
                .parse::<u64>()
                .is_ok_and(|threshold| file.size < threshold),
            FilterOp::LastAdded => filter.value.parse::<i64>().is_ok_and(|seconds| {
                cached.added_on > Utc::now() - chrono::Duration::seconds(seconds)
            }),
        }
    })
}

fn sort_listing(listing: &mut [FileInfo]) {
    listing.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.mod_time.cmp(&b.mod_time))
    });
}
