//! Serial repair worker.
//!
//! Broken torrents are queued on a channel and serviced one at a time:
//! re-inserting submits a fresh magnet and swaps the cache entry; deleting
//! removes the torrent outright. Errors mark the torrent bad and never
//! stop the worker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::TorrentCache;

/// What the worker should do with a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairKind {
    /// Submit the magnet again and swap the cache entry.
    Reinsert,
    /// Remove the torrent from the cache and the provider.
    Delete,
}

/// One queued repair.
#[derive(Debug, Clone)]
pub struct RepairRequest {
    /// Operation to perform.
    pub kind: RepairKind,
    /// Torrent to operate on.
    pub torrent_id: String,
}

/// Spawn the serial worker draining `requests` until the channel closes.
pub(crate) fn spawn_worker(
    cache: Arc<TorrentCache>,
    mut requests: mpsc::Receiver<RepairRequest>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let torrent_id = request.torrent_id.clone();
            match request.kind {
                RepairKind::Reinsert => match cache.reinsert_torrent(&torrent_id).await {
                    Ok(new_id) => {
                        cache
                            .metrics()
                            .inc_repair_operation("reinsert", "ok");
                        info!(old = %torrent_id, new = %new_id, "torrent re-inserted");
                    }
                    Err(err) => {
                        cache
                            .metrics()
                            .inc_repair_operation("reinsert", "failed");
                        warn!(torrent_id = %torrent_id, error = %err, "re-insert failed");
                    }
                },
                RepairKind::Delete => match cache.on_remove(&torrent_id).await {
                    Ok(()) => {
                        cache.metrics().inc_repair_operation("delete", "ok");
                    }
                    Err(err) => {
                        cache.metrics().inc_repair_operation("delete", "failed");
                        warn!(torrent_id = %torrent_id, error = %err, "repair delete failed");
                    }
                },
            }
        }
        info!("repair worker drained");
    })
}
