//! Torrent cache behaviour against a scripted provider client.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use nimbus_config::{CheckPolicy, FilterOp, FolderFilter, FolderNaming, VirtualFolderConfig};
use nimbus_debrid::{
    Accounts, CacheOptions, CachedTorrent, DebridClient, DebridError, DebridResult, DownloadLink,
    InvalidReason, Profile, Torrent, TorrentCache, TorrentFile,
};
use nimbus_telemetry::Metrics;

fn torrent(id: &str, name: &str, minute: u32, files: Vec<TorrentFile>) -> Torrent {
    Torrent {
        id: id.to_owned(),
        info_hash: format!("{id}{id}{id}{id}"),
        name: name.to_owned(),
        filename: format!("{name}.mkv"),
        original_filename: format!("{name}.mkv"),
        size: files.iter().map(|file| file.size).sum(),
        added_at: Utc.with_ymd_and_hms(2026, 7, 1, 10, minute, 0).single().expect("time"),
        files: files
            .into_iter()
            .map(|file| (file.name.clone(), file))
            .collect(),
    }
}

fn file(torrent_id: &str, name: &str, size: u64) -> TorrentFile {
    TorrentFile {
        torrent_id: torrent_id.to_owned(),
        name: name.to_owned(),
        path: format!("/{name}"),
        size,
        link: format!("https://restricted/{torrent_id}/{name}"),
        byte_range: None,
        is_rar: false,
        deleted: false,
    }
}

#[derive(Default)]
struct StubState {
    torrents: HashMap<String, Torrent>,
    submitted: Vec<String>,
    deleted: Vec<String>,
    unrestrict_failures: usize,
}

struct StubClient {
    state: Mutex<StubState>,
}

impl StubClient {
    fn new(torrents: Vec<Torrent>) -> Self {
        Self {
            state: Mutex::new(StubState {
                torrents: torrents.into_iter().map(|t| (t.id.clone(), t)).collect(),
                ..StubState::default()
            }),
        }
    }
}

#[async_trait]
impl DebridClient for StubClient {
    fn name(&self) -> &str {
        "stub"
    }

    async fn submit_magnet(&self, _token: &str, magnet: &str) -> DebridResult<String> {
        let mut state = self.state.lock().expect("lock");
        state.submitted.push(magnet.to_owned());
        let name = magnet
            .split("dn=")
            .nth(1)
            .unwrap_or("Reborn")
            .split('&')
            .next()
            .unwrap_or("Reborn")
            .to_owned();
        let id = format!("reinserted{}", state.submitted.len());
        let fresh = torrent(&id, &name, 30, vec![file(&id, &format!("{name}.mkv"), 10)]);
        state.torrents.insert(id.clone(), fresh);
        Ok(id)
    }

    async fn check_status(
        &self,
        token: &str,
        torrent_id: &str,
        _download_uncached: bool,
    ) -> DebridResult<Torrent> {
        self.get_torrent(token, torrent_id).await
    }

    async fn get_torrents(&self, _token: &str) -> DebridResult<Vec<Torrent>> {
        Ok(self
            .state
            .lock()
            .expect("lock")
            .torrents
            .values()
            .cloned()
            .collect())
    }

    async fn get_torrent(&self, _token: &str, torrent_id: &str) -> DebridResult<Torrent> {
        self.state
            .lock()
            .expect("lock")
            .torrents
            .get(torrent_id)
            .cloned()
            .ok_or_else(|| DebridError::NotFound {
                id: torrent_id.to_owned(),
            })
    }

    async fn update_torrent(&self, token: &str, torrent: &Torrent) -> DebridResult<Torrent> {
        self.get_torrent(token, &torrent.id).await
    }

    async fn delete_torrent(&self, _token: &str, torrent_id: &str) -> DebridResult<()> {
        let mut state = self.state.lock().expect("lock");
        state.torrents.remove(torrent_id);
        state.deleted.push(torrent_id.to_owned());
        Ok(())
    }

    async fn get_download_link(
        &self,
        _token: &str,
        _torrent: &Torrent,
        file: &TorrentFile,
    ) -> DebridResult<DownloadLink> {
        let mut state = self.state.lock().expect("lock");
        if state.unrestrict_failures > 0 {
            state.unrestrict_failures -= 1;
            return Err(DebridError::HosterUnavailable);
        }
        Ok(DownloadLink {
            id: "dl1".into(),
            token: String::new(),
            link: file.link.clone(),
            download_link: format!("https://direct/{}", file.name),
            expires_at: Utc::now(),
            account_id: 0,
        })
    }

    async fn get_downloads(&self, _token: &str) -> DebridResult<Vec<DownloadLink>> {
        Ok(Vec::new())
    }

    async fn delete_download_link(&self, _token: &str, _link_id: &str) -> DebridResult<()> {
        Ok(())
    }

    async fn check_link(&self, _token: &str, _link: &str) -> DebridResult<()> {
        Ok(())
    }

    async fn get_profile(&self, _token: &str) -> DebridResult<Profile> {
        Ok(Profile {
            username: "tester".into(),
            traffic_used: 0,
            premium: true,
        })
    }

    async fn get_available_slots(&self, _token: &str) -> DebridResult<usize> {
        Ok(5)
    }
}

fn options(dir: &std::path::Path) -> CacheOptions {
    CacheOptions {
        provider: "stub".into(),
        dir: dir.to_path_buf(),
        folder_naming: FolderNaming::OriginalNoExt,
        workers: 4,
        link_expiry: chrono::Duration::hours(48),
        check_policy: CheckPolicy::PerFile,
        custom_folders: vec![VirtualFolderConfig {
            name: "shows".into(),
            filters: vec![FolderFilter {
                op: FilterOp::Include,
                value: "s01".into(),
            }],
        }],
        torrent_refresh: Duration::from_secs(900),
        link_refresh: Duration::from_secs(2_400),
        serve_from_rclone: false,
    }
}

fn cache_with(
    dir: &std::path::Path,
    torrents: Vec<Torrent>,
) -> (Arc<TorrentCache>, Arc<StubClient>) {
    let client = Arc::new(StubClient::new(torrents));
    let accounts = Arc::new(Accounts::new(vec!["tok0".into(), "tok1".into()]));
    let cache = TorrentCache::new(
        options(dir),
        Arc::clone(&client) as Arc<dyn DebridClient>,
        accounts,
        Metrics::new().expect("metrics"),
    );
    (cache, client)
}

#[tokio::test]
async fn sync_populates_indices_and_listings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (cache, _client) = cache_with(
        dir.path(),
        vec![
            torrent("t1", "Alpha.S01", 0, vec![file("t1", "Alpha.S01E01.mkv", 100)]),
            torrent("t2", "Beta", 1, vec![file("t2", "Beta.mkv", 200)]),
        ],
    );

    cache.sync().await.expect("sync");

    let all = cache.listing("__all__").await.expect("listing");
    let names: Vec<&str> = all.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec!["Alpha.S01", "Beta"]);

    // The custom folder only matches files containing "s01".
    let shows = cache.listing("shows").await.expect("custom listing");
    assert_eq!(shows.len(), 1);
    assert_eq!(shows[0].name, "Alpha.S01");

    // Readiness closed over true.
    assert!(*cache.ready_receiver().borrow());

    // Persisted documents are indented JSON.
    let raw = std::fs::read_to_string(dir.path().join("t1.json")).expect("document");
    assert!(raw.contains("\n  "));
}

#[tokio::test]
async fn merge_keeps_other_ids_files_and_prunes_on_delete() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (cache, _client) = cache_with(dir.path(), Vec::new());

    // Two ids resolving to the same folder name.
    let mut first = torrent("old1", "Same.Folder", 0, vec![
        file("old1", "Part.A.mkv", 10),
        file("old1", "Shared.mkv", 10),
    ]);
    first.original_filename = "Same.Folder.mkv".into();
    let mut second = torrent("new1", "Same.Folder", 1, vec![
        file("new1", "Part.B.mkv", 20),
        file("new1", "Shared.mkv", 20),
    ]);
    second.original_filename = "Same.Folder.mkv".into();

    cache.insert_cached(CachedTorrent::new(first)).await;
    cache.insert_cached(CachedTorrent::new(second)).await;

    let merged = cache.torrent_by_folder("Same.Folder").await.expect("merged");
    assert_eq!(merged.torrent.id, "new1");
    // {old files with torrent_id != new1} ∪ {new files}.
    let mut names: Vec<&str> = merged.torrent.files.keys().map(String::as_str).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Part.A.mkv", "Part.B.mkv", "Shared.mkv"]);
    assert_eq!(merged.torrent.files["Shared.mkv"].torrent_id, "new1");
    assert_eq!(merged.torrent.files["Part.A.mkv"].torrent_id, "old1");

    // Both ids resolve to the folder.
    assert!(cache.torrent_by_id("old1").await.is_some());
    assert!(cache.torrent_by_id("new1").await.is_some());

    // Deleting the old id prunes only its files.
    cache.remove_id("old1").await;
    let pruned = cache.torrent_by_folder("Same.Folder").await.expect("entry");
    let mut names: Vec<&str> = pruned.torrent.files.keys().map(String::as_str).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Part.B.mkv", "Shared.mkv"]);

    // Deleting the surviving id removes the folder entirely.
    cache.remove_id("new1").await;
    assert!(cache.torrent_by_folder("Same.Folder").await.is_none());
}

#[tokio::test]
async fn download_links_are_cached_until_invalidated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (cache, _client) = cache_with(
        dir.path(),
        vec![torrent("t1", "Alpha", 0, vec![file("t1", "Alpha.mkv", 100)])],
    );
    cache.sync().await.expect("sync");

    let restricted = "https://restricted/t1/Alpha.mkv";
    let first = cache
        .get_download_link("Alpha", "Alpha.mkv", restricted)
        .await
        .expect("resolve");
    assert_eq!(first.download_link, "https://direct/Alpha.mkv");
    assert!(first.expires_at > Utc::now() + chrono::Duration::hours(47));

    // Second call is served from the account cache.
    let second = cache
        .get_download_link("Alpha", "Alpha.mkv", restricted)
        .await
        .expect("cached");
    assert_eq!(second.download_link, first.download_link);

    // Invalidation with bandwidth reason disables account 0; the next
    // resolution comes from account 1.
    cache.mark_link_invalid(&first, InvalidReason::BandwidthExceeded);
    let third = cache
        .get_download_link("Alpha", "Alpha.mkv", restricted)
        .await
        .expect("re-resolve");
    assert_eq!(third.account_id, 1);
}

#[tokio::test]
async fn hoster_unavailable_triggers_reinsert_and_retry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (cache, client) = cache_with(
        dir.path(),
        vec![torrent("t1", "Alpha", 0, vec![file("t1", "Alpha.mkv", 100)])],
    );
    cache.sync().await.expect("sync");
    client.state.lock().expect("lock").unrestrict_failures = 1;

    let resolved = cache
        .get_download_link("Alpha", "Alpha.mkv", "https://restricted/t1/Alpha.mkv")
        .await
        .expect("resolved after reinsert");
    assert!(!resolved.download_link.is_empty());
    assert_eq!(client.state.lock().expect("lock").submitted.len(), 1);
}

#[tokio::test]
async fn reinsert_of_an_unknown_id_fails_and_blacklists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (cache, client) = cache_with(
        dir.path(),
        vec![torrent("t1", "Alpha", 0, vec![file("t1", "Alpha.mkv", 100)])],
    );
    cache.sync().await.expect("sync");

    let err = cache
        .reinsert_torrent("missing")
        .await
        .expect_err("unknown id");
    assert!(matches!(err, DebridError::NotFound { .. }));
    assert!(client.state.lock().expect("lock").submitted.is_empty());

    // The failed id is blacklisted; a second attempt fails fast.
    let err = cache
        .reinsert_torrent("missing")
        .await
        .expect_err("blacklisted");
    assert!(matches!(err, DebridError::Repair { .. }));

    // The healthy torrent was never marked bad.
    assert!(cache.bad_torrent_ids().await.is_empty());
}

#[tokio::test]
async fn on_remove_deletes_upstream_and_locally() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (cache, client) = cache_with(
        dir.path(),
        vec![torrent("t1", "Alpha", 0, vec![file("t1", "Alpha.mkv", 100)])],
    );
    cache.sync().await.expect("sync");

    cache.on_remove("t1").await.expect("remove");
    assert!(cache.torrent_by_folder("Alpha").await.is_none());
    assert_eq!(client.state.lock().expect("lock").deleted, vec!["t1"]);

    // The persisted record moved to trash.
    assert!(dir.path().join("trash").join("t1.json").exists());
}

#[tokio::test]
async fn remove_file_hides_the_logical_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (cache, _client) = cache_with(
        dir.path(),
        vec![torrent(
            "t1",
            "Alpha",
            0,
            vec![file("t1", "Alpha.mkv", 100), file("t1", "Extra.mkv", 10)],
        )],
    );
    cache.sync().await.expect("sync");

    assert!(cache.remove_file("Alpha", "Extra.mkv").await);
    assert!(cache.file("Alpha", "Extra.mkv").await.is_none());
    assert!(cache.file("Alpha", "Alpha.mkv").await.is_some());

    let listing = cache.folder_listing("Alpha").await.expect("folder");
    assert_eq!(listing.len(), 1);
}
