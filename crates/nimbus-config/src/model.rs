//! Serde model for the Nimbus configuration document.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log level passed to the tracing subscriber (`info` by default).
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    /// Log output format: `json`, `pretty`, or empty for build-dependent.
    #[serde(default)]
    pub log_format: String,
    /// Root directory for on-disk caches (`torrents/`, `usenet/`).
    pub cache_dir: PathBuf,
    /// WebDAV server surface.
    #[serde(default)]
    pub webdav: WebdavConfig,
    /// Streaming engine tunables.
    #[serde(default)]
    pub streaming: StreamingConfig,
    /// Ordered Usenet providers; order is the failover order.
    #[serde(default)]
    pub usenet_providers: Vec<UsenetProviderConfig>,
    /// Categories the usenet store partitions records into.
    #[serde(default = "defaults::categories")]
    pub categories: Vec<String>,
    /// Debrid providers served under the WebDAV root.
    #[serde(default)]
    pub debrid_providers: Vec<DebridProviderConfig>,
    /// Optional rclone remote-control endpoint for VFS cache invalidation.
    #[serde(default)]
    pub rclone: Option<RcloneConfig>,
}

/// WebDAV listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebdavConfig {
    /// Socket address the server binds to.
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: SocketAddr,
    /// Path prefix prepended to every route (no trailing slash).
    #[serde(default)]
    pub url_base: String,
}

impl Default for WebdavConfig {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            url_base: String::new(),
        }
    }
}

/// Streaming engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Segment cache capacity in MiB.
    #[serde(default = "defaults::segment_cache_mib")]
    pub segment_cache_mib: u64,
    /// Segments downloaded concurrently per chunk.
    #[serde(default = "defaults::chunk_size")]
    pub chunk_size: usize,
    /// Retry attempts per segment download.
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            segment_cache_mib: defaults::segment_cache_mib(),
            chunk_size: defaults::chunk_size(),
            max_retries: defaults::max_retries(),
        }
    }
}

/// One Usenet provider entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsenetProviderConfig {
    /// Unique provider name used in logs and the pool map.
    pub name: String,
    /// Server hostname.
    pub address: String,
    /// Server port (119 plain, 563 implicit TLS customarily).
    pub port: u16,
    /// Dial with implicit TLS.
    #[serde(default)]
    pub ssl: bool,
    /// Upgrade a plain connection with `STARTTLS`.
    #[serde(default)]
    pub use_tls: bool,
    /// Optional username for `AUTHINFO USER`.
    #[serde(default)]
    pub username: String,
    /// Optional password for `AUTHINFO PASS`.
    #[serde(default)]
    pub password: String,
    /// Pool size for this provider.
    #[serde(default = "defaults::max_connections")]
    pub max_connections: usize,
}

/// One debrid provider entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebridProviderConfig {
    /// Provider name; also the WebDAV path segment.
    pub name: String,
    /// REST API base URL.
    pub api_url: String,
    /// API tokens, one per account, in rotation order.
    pub tokens: Vec<String>,
    /// How virtual folder names are derived from torrents.
    #[serde(default)]
    pub folder_naming: FolderNaming,
    /// Worker count for sync and repair fan-out.
    #[serde(default = "defaults::workers")]
    pub workers: usize,
    /// Seconds between full torrent refreshes.
    #[serde(default = "defaults::torrent_refresh_secs")]
    pub torrent_refresh_secs: u64,
    /// Seconds between download-link cache refreshes.
    #[serde(default = "defaults::link_refresh_secs")]
    pub download_links_refresh_secs: u64,
    /// Hours a resolved download link stays cached.
    #[serde(default = "defaults::link_expiry_hours")]
    pub auto_expire_links_after_hours: u64,
    /// Redirect plain streams to rclone instead of proxying.
    #[serde(default)]
    pub serve_from_rclone: bool,
    /// Broken-torrent detection granularity.
    #[serde(default)]
    pub check_policy: CheckPolicy,
    /// Custom folder views in addition to `__all__`/`__bad__`/`torrents`.
    #[serde(default)]
    pub folders: Vec<VirtualFolderConfig>,
}

/// Strategy deriving a virtual folder name from a torrent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderNaming {
    /// Use `filename` as-is.
    Filename,
    /// Use `filename` with the extension stripped.
    FilenameNoExt,
    /// Use `original_filename` as-is.
    Original,
    /// Use `original_filename` with the extension stripped.
    #[default]
    OriginalNoExt,
    /// Use the provider-assigned torrent id.
    Id,
    /// Use the lowercased infohash.
    InfohashLower,
}

/// Broken-torrent detection granularity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPolicy {
    /// Check every file's link individually.
    #[default]
    PerFile,
    /// Short-circuit the torrent as broken on the first bad file.
    PerTorrent,
}

/// A configured custom folder: a name plus a conjunction of filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualFolderConfig {
    /// Folder name under the provider root.
    pub name: String,
    /// All filters must match for a file to appear in the folder.
    #[serde(default)]
    pub filters: Vec<FolderFilter>,
}

/// A single file filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderFilter {
    /// Filter operator.
    pub op: FilterOp,
    /// Operand; meaning depends on the operator (substring, pattern,
    /// byte count, or a duration in seconds for `last_added`).
    pub value: String,
}

/// Supported filter operators, matched case-insensitively on file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Name contains the operand.
    Include,
    /// Name does not contain the operand.
    Exclude,
    /// Name starts with the operand.
    StartsWith,
    /// Name ends with the operand.
    EndsWith,
    /// Name matches the operand as a regular expression.
    Regex,
    /// Name equals the operand.
    ExactMatch,
    /// File size is greater than the operand in bytes.
    SizeGt,
    /// File size is smaller than the operand in bytes.
    SizeLt,
    /// File was added within the last operand seconds.
    LastAdded,
}

/// rclone remote-control endpoint used for best-effort VFS invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcloneConfig {
    /// Base URL of the rclone RC server.
    pub rc_url: String,
    /// Optional basic-auth user.
    #[serde(default)]
    pub user: String,
    /// Optional basic-auth password.
    #[serde(default)]
    pub password: String,
    /// VFS remote name passed to `vfs/forget` and `vfs/refresh`.
    #[serde(default)]
    pub vfs_name: String,
}
