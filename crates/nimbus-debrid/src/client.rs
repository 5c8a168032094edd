//! Capability contract implemented by every debrid provider.

use async_trait::async_trait;

use crate::error::DebridResult;
use crate::model::{DownloadLink, Torrent, TorrentFile};

/// Account profile snapshot.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    /// Provider-side user name.
    pub username: String,
    /// Bytes of traffic consumed in the current window.
    pub traffic_used: u64,
    /// Whether the subscription is active.
    pub premium: bool,
}

/// Operations the engine consumes from a provider's REST surface.
///
/// Every method takes the issuing account's token so the cache can rotate
/// accounts without rebuilding clients.
#[async_trait]
pub trait DebridClient: Send + Sync {
    /// Provider name; also the WebDAV path segment.
    fn name(&self) -> &str;

    /// Submit a magnet and return the provider-assigned torrent id.
    async fn submit_magnet(&self, token: &str, magnet: &str) -> DebridResult<String>;

    /// Fetch a torrent's current state, optionally forcing an uncached
    /// download to start.
    async fn check_status(
        &self,
        token: &str,
        torrent_id: &str,
        download_uncached: bool,
    ) -> DebridResult<Torrent>;

    /// Fetch the authoritative torrent list.
    async fn get_torrents(&self, token: &str) -> DebridResult<Vec<Torrent>>;

    /// Fetch one torrent by id.
    async fn get_torrent(&self, token: &str, torrent_id: &str) -> DebridResult<Torrent>;

    /// Ask the provider to refresh a torrent's file links.
    async fn update_torrent(&self, token: &str, torrent: &Torrent) -> DebridResult<Torrent>;

    /// Delete a torrent from the provider.
    async fn delete_torrent(&self, token: &str, torrent_id: &str) -> DebridResult<()>;

    /// Exchange a file's restricted link for a direct download URL.
    async fn get_download_link(
        &self,
        token: &str,
        torrent: &Torrent,
        file: &TorrentFile,
    ) -> DebridResult<DownloadLink>;

    /// List resolved downloads on the account.
    async fn get_downloads(&self, token: &str) -> DebridResult<Vec<DownloadLink>>;

    /// Delete a resolved download link from the account.
    async fn delete_download_link(&self, token: &str, link_id: &str) -> DebridResult<()>;

    /// Cheap availability check for a restricted link.
    async fn check_link(&self, token: &str, link: &str) -> DebridResult<()>;

    /// Fetch the account profile.
    async fn get_profile(&self, token: &str) -> DebridResult<Profile>;

    /// Remaining torrent slots on the account.
    async fn get_available_slots(&self, token: &str) -> DebridResult<usize>;

    /// Key under which resolved links are cached per account.
    ///
    /// Some providers issue restricted links whose tail varies per request;
    /// those override this to a stable prefix.
    fn link_cache_key<'a>(&self, link: &'a str) -> &'a str {
        link
    }
}
