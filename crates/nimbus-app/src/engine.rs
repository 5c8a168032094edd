//! The engine: owner of all per-provider state.
//!
//! Every cache, pool, and store is owned here and handed out as `Arc`s;
//! nothing lives in module-level statics.

use std::sync::Arc;
use std::time::Duration;

use nimbus_config::AppConfig;
use nimbus_core::BuildInfo;
use nimbus_debrid::{
    Accounts, CacheOptions, DebridClient, RealDebridClient, TorrentCache,
};
use nimbus_nntp::{Client, ProviderSettings};
use nimbus_nzb::NzbParser;
use nimbus_store::{RcloneNotifier, UsenetStore};
use nimbus_stream::{SegmentCache, SegmentStreamer, StreamerConfig};
use nimbus_telemetry::Metrics;
use nimbus_webdav::{DavBackend, DebridDavBackend, UsenetDavBackend};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::imports::ImportIntake;

/// Owns every long-lived service of the process.
pub struct Engine {
    /// Validated configuration.
    pub config: AppConfig,
    /// Shared metrics registry.
    pub metrics: Metrics,
    /// Build metadata served as `version.txt`.
    pub build_info: BuildInfo,
    /// NNTP failover client; absent without usenet providers.
    pub nntp: Option<Arc<Client>>,
    /// Usenet store; absent without usenet providers.
    pub usenet_store: Option<Arc<UsenetStore>>,
    /// Usenet WebDAV backends, one per provider name.
    usenet_backends: Vec<Arc<UsenetDavBackend>>,
    /// Per-provider torrent caches.
    pub debrid_caches: Vec<Arc<TorrentCache>>,
    /// NZB parser bound to the NNTP client for probing.
    pub parser: Arc<NzbParser>,
    /// Import intake.
    pub imports: Arc<ImportIntake>,
}

impl Engine {
    /// Wire every service from the configuration.
    ///
    /// # Errors
    ///
    /// Fails when no usenet provider could connect while usenet providers
    /// are configured, and on metrics registration failures. Debrid caches
    /// are constructed lazily and only fail later, during sync.
    pub async fn build(config: AppConfig) -> AppResult<Self> {
        let metrics = Metrics::new().map_err(|source| AppError::Telemetry { source })?;
        let build_info = BuildInfo {
            name: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            build_sha: nimbus_telemetry::build_sha().to_owned(),
        };

        // NNTP client over every configured provider, in failover order.
        let nntp = if config.usenet_providers.is_empty() {
            None
        } else {
            let settings: Vec<ProviderSettings> = config
                .usenet_providers
                .iter()
                .map(|provider| ProviderSettings {
                    name: provider.name.clone(),
                    address: provider.address.clone(),
                    port: provider.port,
                    ssl: provider.ssl,
                    use_tls: provider.use_tls,
                    username: provider.username.clone(),
                    password: provider.password.clone(),
                    max_connections: provider.max_connections,
                })
                .collect();
            let client = Client::connect(settings)
                .await
                .map_err(|source| AppError::Nntp { source })?;
            info!(providers = client.provider_count(), "nntp client ready");
            Some(Arc::new(client))
        };

        let segment_cache = Arc::new(SegmentCache::with_max_bytes(
            config.streaming.segment_cache_mib * 1024 * 1024,
        ));

        let rclone = config.rclone.as_ref().map(|rc| {
            RcloneNotifier::new(
                rc.rc_url.clone(),
                &rc.user,
                &rc.password,
                rc.vfs_name.clone(),
            )
        });

        let usenet_store = nntp.as_ref().map(|_| {
            Arc::new(UsenetStore::new(
                config.cache_dir.join("usenet"),
                rclone,
            ))
        });

        let parser = Arc::new(NzbParser::new(nntp.clone()));

        let usenet_backends = match (&nntp, &usenet_store) {
            (Some(client), Some(store)) => {
                let streamer = SegmentStreamer::new(
                    Arc::clone(client),
                    Arc::clone(&segment_cache),
                    StreamerConfig {
                        chunk_size: config.streaming.chunk_size,
                        max_retries: config.streaming.max_retries,
                    },
                    metrics.clone(),
                );
                config
                    .usenet_providers
                    .iter()
                    .map(|provider| {
                        Arc::new(UsenetDavBackend::new(
                            provider.name.clone(),
                            Arc::clone(store),
                            streamer.clone(),
                            build_info.clone(),
                        ))
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        let mut debrid_caches = Vec::new();
        for provider in &config.debrid_providers {
            let client: Arc<dyn DebridClient> = Arc::new(RealDebridClient::new(
                provider.name.clone(),
                provider.api_url.clone(),
            ));
            let accounts = Arc::new(Accounts::new(provider.tokens.clone()));
            let cache = TorrentCache::new(
                CacheOptions {
                    provider: provider.name.clone(),
                    dir: config.cache_dir.join(&provider.name),
                    folder_naming: provider.folder_naming,
                    workers: provider.workers,
                    link_expiry: chrono::Duration::hours(
                        i64::try_from(provider.auto_expire_links_after_hours).unwrap_or(48),
                    ),
                    check_policy: provider.check_policy,
                    custom_folders: provider.folders.clone(),
                    torrent_refresh: Duration::from_secs(provider.torrent_refresh_secs),
                    link_refresh: Duration::from_secs(provider.download_links_refresh_secs),
                    serve_from_rclone: provider.serve_from_rclone,
                },
                client,
                accounts,
                metrics.clone(),
            );
            debrid_caches.push(cache);
        }

        Ok(Self {
            config,
            metrics,
            build_info,
            nntp,
            usenet_store,
            usenet_backends,
            debrid_caches,
            parser,
            imports: ImportIntake::new(),
        })
    }

    /// The WebDAV backends, debrid first, in configured order.
    #[must_use]
    pub fn dav_backends(&self) -> Vec<Arc<dyn DavBackend>> {
        let mut backends: Vec<Arc<dyn DavBackend>> = Vec::new();
        for cache in &self.debrid_caches {
            backends.push(Arc::new(DebridDavBackend::new(
                Arc::clone(cache),
                self.build_info.clone(),
            )));
        }
        for backend in &self.usenet_backends {
            backends.push(Arc::clone(backend) as Arc<dyn DavBackend>);
        }
        backends
    }

    /// Start background work: store load, initial syncs, repair workers,
    /// per-cache schedulers, and the import worker.
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(store) = &self.usenet_store {
            match store.load().await {
                Ok(count) => info!(count, "usenet store ready"),
                Err(err) => warn!(error = %err, "usenet store load failed"),
            }
            for backend in &self.usenet_backends {
                backend.mark_ready();
            }
        }

        for cache in &self.debrid_caches {
            let sync_cache = Arc::clone(cache);
            handles.push(tokio::spawn(async move {
                if let Err(err) = sync_cache.sync().await {
                    warn!(provider = %sync_cache.provider(), error = %err, "initial sync failed");
                }
            }));
            handles.push(cache.start_repair_worker().await);
            handles.extend(cache.spawn_schedulers());
        }

        let usenet = match (&self.usenet_store, &self.nntp) {
            (Some(store), Some(_)) => Some((Arc::clone(store), Arc::clone(&self.parser))),
            _ => None,
        };
        handles.push(
            self.imports
                .start_worker(self.debrid_caches.clone(), usenet)
                .await,
        );
        handles
    }

    /// Close the NNTP pools; used during shutdown.
    pub async fn shutdown(&self) {
        if let Some(client) = &self.nntp {
            client.close().await;
        }
        info!("engine shut down");
    }
}
