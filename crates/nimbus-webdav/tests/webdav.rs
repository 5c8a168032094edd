//! WebDAV surface tests over stubbed backends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{TimeZone, Utc};
use nimbus_config::{CheckPolicy, FolderNaming};
use nimbus_core::BuildInfo;
use nimbus_debrid::{
    Accounts, CacheOptions, DebridClient, DebridError, DebridResult, DownloadLink, Profile,
    Torrent, TorrentCache, TorrentFile,
};
use nimbus_nntp::{Client, ProviderSettings};
use nimbus_store::UsenetStore;
use nimbus_stream::{SegmentCache, SegmentStreamer, StreamerConfig};
use nimbus_telemetry::Metrics;
use nimbus_test_support::nntp::{StubArticle, StubNntpServer};
use nimbus_test_support::yenc::{encode_part, patterned_payload};
use nimbus_webdav::{DavServer, DebridDavBackend, UsenetDavBackend, router};
use tower::ServiceExt;

fn build_info() -> BuildInfo {
    BuildInfo {
        name: "nimbus".into(),
        version: "0.1.0".into(),
        build_sha: "test".into(),
    }
}

struct StubClient {
    torrents: HashMap<String, Torrent>,
}

#[async_trait]
impl DebridClient for StubClient {
    fn name(&self) -> &str {
        "realdebrid"
    }

    async fn submit_magnet(&self, _token: &str, _magnet: &str) -> DebridResult<String> {
        Err(DebridError::Api {
            status: 500,
            message: "not scripted".into(),
        })
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
        Ok(self.torrents.values().cloned().collect())
    }

    async fn get_torrent(&self, _token: &str, torrent_id: &str) -> DebridResult<Torrent> {
        self.torrents
            .get(torrent_id)
            .cloned()
            .ok_or_else(|| DebridError::NotFound {
                id: torrent_id.to_owned(),
            })
    }

    async fn update_torrent(&self, token: &str, torrent: &Torrent) -> DebridResult<Torrent> {
        self.get_torrent(token, &torrent.id).await
    }

    async fn delete_torrent(&self, _token: &str, _torrent_id: &str) -> DebridResult<()> {
        Ok(())
    }

    async fn get_download_link(
        &self,
        _token: &str,
        _torrent: &Torrent,
        file: &TorrentFile,
    ) -> DebridResult<DownloadLink> {
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
        Ok(Profile::default())
    }

    async fn get_available_slots(&self, _token: &str) -> DebridResult<usize> {
        Ok(5)
    }
}

fn torrent(id: &str, name: &str, minute: u32) -> Torrent {
    let file = TorrentFile {
        torrent_id: id.to_owned(),
        name: format!("{name}.mkv"),
        path: format!("/{name}.mkv"),
        size: 1_000,
        link: format!("https://restricted/{id}"),
        byte_range: None,
        is_rar: false,
        deleted: false,
    };
    Torrent {
        id: id.to_owned(),
        info_hash: format!("{id}{id}"),
        name: name.to_owned(),
        filename: format!("{name}.mkv"),
        original_filename: format!("{name}.mkv"),
        size: 1_000,
        added_at: Utc.with_ymd_and_hms(2026, 7, 1, 9, minute, 0).single().expect("time"),
        files: [(file.name.clone(), file)].into_iter().collect(),
    }
}

async fn debrid_router(dir: &std::path::Path, torrents: Vec<Torrent>) -> Router {
    let client = Arc::new(StubClient {
        torrents: torrents.into_iter().map(|t| (t.id.clone(), t)).collect(),
    });
    let cache = TorrentCache::new(
        CacheOptions {
            provider: "realdebrid".into(),
            dir: dir.to_path_buf(),
            folder_naming: FolderNaming::OriginalNoExt,
            workers: 4,
            link_expiry: chrono::Duration::hours(48),
            check_policy: CheckPolicy::PerFile,
            custom_folders: Vec::new(),
            torrent_refresh: Duration::from_secs(900),
            link_refresh: Duration::from_secs(2_400),
            serve_from_rclone: false,
        },
        client as Arc<dyn DebridClient>,
        Arc::new(Accounts::new(vec!["tok".into()])),
        Metrics::new().expect("metrics"),
    );
    cache.sync().await.expect("sync");

    let backend = Arc::new(DebridDavBackend::new(cache, build_info()));
    let server = Arc::new(DavServer::new(
        String::new(),
        vec![backend],
        Metrics::new().expect("metrics"),
    ));
    router(server)
}

async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 10 * 1024 * 1024)
        .await
        .expect("body");
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn html_listing_orders_by_name_and_rejects_parent_delete() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = debrid_router(
        dir.path(),
        vec![torrent("t2", "Beta", 2), torrent("t1", "Alpha", 1)],
    )
    .await;

    let response = app
        .clone()
        .oneshot(
            Request::get("/webdav/realdebrid/__all__/")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_string(response).await;
    let alpha = html.find("Alpha").expect("alpha listed");
    let beta = html.find("Beta").expect("beta listed");
    assert!(alpha < beta, "Alpha lists before Beta");

    // Deleting a parent directory is a read-only violation.
    let response = app
        .oneshot(
            Request::delete("/webdav/realdebrid/__all__")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn propfind_depth_one_lists_children_and_infinity_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = debrid_router(dir.path(), vec![torrent("t1", "Alpha", 1)]).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PROPFIND")
                .uri("/webdav/realdebrid/__all__/")
                .header("Depth", "1")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    let xml = body_string(response).await;
    assert!(xml.contains("<D:multistatus"));
    assert!(xml.contains("Alpha"));
    assert!(xml.contains("<D:collection/>"));

    let response = app
        .oneshot(
            Request::builder()
                .method("PROPFIND")
                .uri("/webdav/realdebrid/__all__/")
                .header("Depth", "infinity")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn version_txt_serves_with_etag_and_ranges() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = debrid_router(dir.path(), vec![torrent("t1", "Alpha", 1)]).await;

    let response = app
        .clone()
        .oneshot(
            Request::get("/webdav/realdebrid/version.txt")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::ETAG));
    assert!(response.headers().contains_key(header::LAST_MODIFIED));
    assert_eq!(
        response.headers()[header::ACCEPT_RANGES],
        HeaderValueExt("bytes")
    );
    let body = body_string(response).await;
    assert!(body.starts_with("nimbus 0.1.0"));

    // An unsatisfiable range answers 416 with the entity size.
    let response = app
        .oneshot(
            Request::get("/webdav/realdebrid/version.txt")
                .header(header::RANGE, "bytes=xyz")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    let content_range = response.headers()[header::CONTENT_RANGE]
        .to_str()
        .expect("ascii");
    assert!(content_range.starts_with("bytes */"));
}

/// Header value comparison helper keeping assertions terse.
#[derive(Debug)]
struct HeaderValueExt(&'static str);

impl PartialEq<HeaderValueExt> for axum::http::HeaderValue {
    fn eq(&self, other: &HeaderValueExt) -> bool {
        self.to_str().map(|s| s == other.0).unwrap_or(false)
    }
}

#[tokio::test]
async fn options_advertises_dav_and_methods() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = debrid_router(dir.path(), vec![torrent("t1", "Alpha", 1)]).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/webdav/realdebrid/")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["DAV"], HeaderValueExt("1, 2"));
    let allow = response.headers()[header::ALLOW].to_str().expect("ascii");
    assert!(allow.contains("PROPFIND"));
    assert!(allow.contains("DELETE"));
}

#[tokio::test]
async fn delete_removes_a_torrent_and_write_methods_are_forbidden() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = debrid_router(dir.path(), vec![torrent("t1", "Alpha", 1)]).await;

    let response = app
        .clone()
        .oneshot(
            Request::delete("/webdav/realdebrid/__all__/Alpha.2024")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    // Folder name under OriginalNoExt policy is "Alpha" (mkv stripped).
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(
            Request::delete("/webdav/realdebrid/__all__/Alpha")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(
            Request::builder()
                .method("MKCOL")
                .uri("/webdav/realdebrid/newdir")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn usenet_backend_streams_ranges_end_to_end() {
    let nntp = StubNntpServer::start().await;
    let payload = patterned_payload(1_024, 33);
    let total = payload.len() as u64;

    // Publish three 400-byte parts.
    let mut segments = Vec::new();
    for (index, part) in payload.chunks(400).enumerate() {
        let number = u32::try_from(index + 1).expect("parts");
        let message_id = format!("ep.{number}@fixture");
        let begin = (index * 400) as u64;
        nntp.add_article(
            &format!("<{message_id}>"),
            StubArticle::with_body(encode_part("episode.mkv", u64::from(number), 3, total, begin + 1, part)),
        )
        .await;
        segments.push(nimbus_nzb::NzbSegment {
            number,
            message_id,
            bytes: part.len() as u64,
            start_offset: begin,
            end_offset: begin + part.len() as u64,
            group: "alt.binaries.test".to_owned(),
        });
    }

    let store_dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(UsenetStore::new(store_dir.path().to_path_buf(), None));
    let id = nimbus_nzb::compute_id("My Show", total, "sonarr", "");
    store
        .add(nimbus_nzb::Nzb {
            id: id.clone(),
            name: "My Show".into(),
            title: String::new(),
            category: "sonarr".into(),
            password: String::new(),
            total_size: total,
            added_on: Utc::now(),
            status: nimbus_nzb::NzbStatus::Completed,
            completed_on: Some(Utc::now()),
            progress: 100,
            downloaded: true,
            storage: String::new(),
            files: vec![nimbus_nzb::NzbFile {
                nzb_id: id,
                name: "episode.mkv".into(),
                size: total,
                segment_size: 400,
                start_offset: 0,
                is_rar_archive: false,
                password: String::new(),
                groups: vec!["alt.binaries.test".into()],
                segments,
                deleted: false,
            }],
            is_bad: false,
        })
        .await
        .expect("add");

    let client = Arc::new(
        Client::connect(vec![ProviderSettings {
            name: "stub".into(),
            address: nntp.addr().ip().to_string(),
            port: nntp.addr().port(),
            ssl: false,
            use_tls: false,
            username: String::new(),
            password: String::new(),
            max_connections: 2,
        }])
        .await
        .expect("client"),
    );
    let streamer = SegmentStreamer::new(
        client,
        Arc::new(SegmentCache::new()),
        StreamerConfig::default(),
        Metrics::new().expect("metrics"),
    );

    let backend = Arc::new(UsenetDavBackend::new(
        "eweka".into(),
        store,
        streamer,
        build_info(),
    ));
    backend.mark_ready();
    let server = Arc::new(DavServer::new(
        String::new(),
        vec![backend],
        Metrics::new().expect("metrics"),
    ));
    let app = router(server);

    let response = app
        .clone()
        .oneshot(
            Request::get("/webdav/eweka/__all__/My%20Show/episode.mkv")
                .header(header::RANGE, "bytes=200-900")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE]
            .to_str()
            .expect("ascii"),
        format!("bytes 200-900/{total}")
    );
    let bytes = axum::body::to_bytes(response.into_body(), 10 * 1024 * 1024)
        .await
        .expect("body");
    assert_eq!(bytes.len(), 701);
    assert_eq!(bytes.as_ref(), &payload[200..=900]);

    // The backend gates requests until ready.
    let gated_backend = Arc::new(UsenetDavBackend::new(
        "gated".into(),
        Arc::new(UsenetStore::new(store_dir.path().to_path_buf(), None)),
        SegmentStreamer::new(
            Arc::new(
                Client::connect(vec![ProviderSettings {
                    name: "stub2".into(),
                    address: nntp.addr().ip().to_string(),
                    port: nntp.addr().port(),
                    ssl: false,
                    use_tls: false,
                    username: String::new(),
                    password: String::new(),
                    max_connections: 1,
                }])
                .await
                .expect("client"),
            ),
            Arc::new(SegmentCache::new()),
            StreamerConfig::default(),
            Metrics::new().expect("metrics"),
        ),
        build_info(),
    ));
    let gated = Arc::new(DavServer::new(
        String::new(),
        vec![gated_backend],
        Metrics::new().expect("metrics"),
    ));
    let response = router(gated)
        .oneshot(
            Request::get("/webdav/gated/__all__/")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response.headers()[header::RETRY_AFTER],
        HeaderValueExt("5")
    );
}
