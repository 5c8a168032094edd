//! Engine-side import intake.
//!
//! The external import surface hands over [`ImportRequest`]s; this module
//! consumes each exactly once: magnets are submitted to the owning debrid
//! provider and polled to completion, NZB documents are parsed and enqueued
//! into the usenet store. Completion fires the optional callback once,
//! best-effort. Requests stuck in processing past the stall deadline are
//! failed by the global sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nimbus_debrid::{CachedTorrent, TorrentCache};
use nimbus_nzb::NzbParser;
use nimbus_store::UsenetStore;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long a request may sit in processing before the sweep fails it.
const STALL_DEADLINE: Duration = Duration::from_secs(10 * 60);
/// Poll cadence while waiting for a submitted magnet to complete.
const MAGNET_POLL: Duration = Duration::from_secs(5);
/// Poll attempts before a magnet submission counts as stalled.
const MAGNET_POLL_ATTEMPTS: u32 = 60;

/// Post-import action requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportAction {
    /// Create a symlink into the library.
    Symlink,
    /// Download the payload locally.
    Download,
    /// Only register the content.
    #[default]
    None,
}

/// Lifecycle of an import request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// Accepted, not yet picked up.
    Pending,
    /// Being processed by the intake worker.
    Processing,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
}

/// One import handed over by the external surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Request identifier.
    pub id: Uuid,
    /// Magnet URI for debrid imports.
    #[serde(default)]
    pub magnet: Option<String>,
    /// Raw NZB XML for usenet imports.
    #[serde(default)]
    pub nzb_content: Option<String>,
    /// Display file name accompanying an NZB.
    #[serde(default)]
    pub nzb_filename: String,
    /// External caller context (category in the usenet store).
    #[serde(default)]
    pub arr: String,
    /// Post-import action.
    #[serde(default)]
    pub action: ImportAction,
    /// Target folder for `download` actions.
    #[serde(default)]
    pub download_folder: String,
    /// Submit uncached content for download.
    #[serde(default)]
    pub download_uncached: bool,
    /// Callback fired once on completion or failure.
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Whether the caller awaits the result elsewhere.
    #[serde(default)]
    pub r#async: bool,
    /// Current status.
    pub status: ImportStatus,
    /// When the request was accepted.
    pub created_at: DateTime<Utc>,
    /// When a terminal state was reached.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure detail for terminal failures.
    #[serde(default)]
    pub error: Option<String>,
}

impl ImportRequest {
    /// New pending magnet import.
    #[must_use]
    pub fn magnet(magnet: impl Into<String>, arr: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            magnet: Some(magnet.into()),
            nzb_content: None,
            nzb_filename: String::new(),
            arr: arr.into(),
            action: ImportAction::default(),
            download_folder: String::new(),
            download_uncached: false,
            callback_url: None,
            r#async: true,
            status: ImportStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// New pending NZB import.
    #[must_use]
    pub fn nzb(
        content: impl Into<String>,
        filename: impl Into<String>,
        arr: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            magnet: None,
            nzb_content: Some(content.into()),
            nzb_filename: filename.into(),
            arr: arr.into(),
            action: ImportAction::default(),
            download_folder: String::new(),
            download_uncached: false,
            callback_url: None,
            r#async: true,
            status: ImportStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}

/// Shared intake state: a channel of pending work plus a ledger of
/// in-flight and terminal requests.
pub struct ImportIntake {
    tx: mpsc::Sender<ImportRequest>,
    rx: Mutex<Option<mpsc::Receiver<ImportRequest>>>,
    ledger: Mutex<HashMap<Uuid, ImportRequest>>,
    http: reqwest::Client,
}

impl ImportIntake {
    /// New intake with a bounded queue.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel(256);
        Arc::new(Self {
            tx,
            rx: Mutex::new(Some(rx)),
            ledger: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
        })
    }

    /// Accept a request; it will be consumed exactly once by the worker.
    pub async fn submit(&self, request: ImportRequest) -> bool {
        self.ledger
            .lock()
            .await
            .insert(request.id, request.clone());
        self.tx.send(request).await.is_ok()
    }

    /// Snapshot one request's current state.
    pub async fn get(&self, id: Uuid) -> Option<ImportRequest> {
        self.ledger.lock().await.get(&id).cloned()
    }

    /// Fail requests stuck in processing past the stall deadline.
    pub async fn sweep_stalled(&self) -> usize {
        let deadline = Utc::now()
            - chrono::Duration::from_std(STALL_DEADLINE).unwrap_or_else(|_| {
                chrono::Duration::seconds(600)
            });
        let mut swept = 0;
        let mut ledger = self.ledger.lock().await;
        for request in ledger.values_mut() {
            if request.status == ImportStatus::Processing && request.created_at < deadline {
                request.status = ImportStatus::Failed;
                request.completed_at = Some(Utc::now());
                request.error = Some("import stalled".to_owned());
                swept += 1;
            }
        }
        if swept > 0 {
            warn!(swept, "stalled imports failed by sweep");
        }
        swept
    }

    /// Start the intake worker. Call once.
    ///
    /// # Panics
    ///
    /// Panics when called twice; the receiver is consumed on first use.
    pub async fn start_worker(
        self: &Arc<Self>,
        debrid_caches: Vec<Arc<TorrentCache>>,
        usenet: Option<(Arc<UsenetStore>, Arc<NzbParser>)>,
    ) -> JoinHandle<()> {
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .expect("import worker already started");
        let intake = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                intake
                    .process(request, &debrid_caches, usenet.as_ref())
                    .await;
            }
            debug!("import intake drained");
        })
    }

    async fn process(
        &self,
        mut request: ImportRequest,
        debrid_caches: &[Arc<TorrentCache>],
        usenet: Option<&(Arc<UsenetStore>, Arc<NzbParser>)>,
    ) {
        request.status = ImportStatus::Processing;
        self.record(&request).await;

        let outcome = if request.magnet.is_some() {
            self.process_magnet(&request, debrid_caches).await
        } else if request.nzb_content.is_some() {
            self.process_nzb(&request, usenet).await
        } else {
            Err("request carries neither magnet nor nzb".to_owned())
        };

        request.completed_at = Some(Utc::now());
        match outcome {
            Ok(()) => {
                request.status = ImportStatus::Completed;
                info!(id = %request.id, "import completed");
            }
            Err(detail) => {
                request.status = ImportStatus::Failed;
                request.error = Some(detail.clone());
                warn!(id = %request.id, detail, "import failed");
            }
        }
        self.record(&request).await;
        self.fire_callback(&request).await;
    }

    async fn process_magnet(
        &self,
        request: &ImportRequest,
        debrid_caches: &[Arc<TorrentCache>],
    ) -> Result<(), String> {
        let magnet = request.magnet.as_deref().expect("checked by caller");
        let cache = debrid_caches
            .first()
            .ok_or_else(|| "no debrid provider configured".to_owned())?;

        let torrent = cache
            .import_magnet(magnet, request.download_uncached, MAGNET_POLL, MAGNET_POLL_ATTEMPTS)
            .await
            .map_err(|err| err.to_string())?;
        cache.insert_cached(CachedTorrent::new(torrent)).await;
        Ok(())
    }

    async fn process_nzb(
        &self,
        request: &ImportRequest,
        usenet: Option<&(Arc<UsenetStore>, Arc<NzbParser>)>,
    ) -> Result<(), String> {
        let content = request.nzb_content.as_deref().expect("checked by caller");
        let (store, parser) = usenet.ok_or_else(|| "no usenet provider configured".to_owned())?;

        let category = if request.arr.is_empty() {
            "default"
        } else {
            &request.arr
        };
        let nzb = parser
            .parse(content, &request.nzb_filename, category)
            .await
            .map_err(|err| err.to_string())?;
        store.add(nzb.clone()).await.map_err(|err| err.to_string())?;
        store.enqueue(nzb).await;
        Ok(())
    }

    async fn record(&self, request: &ImportRequest) {
        self.ledger
            .lock()
            .await
            .insert(request.id, request.clone());
    }

    /// Best-effort completion callback; failures are logged at debug.
    async fn fire_callback(&self, request: &ImportRequest) {
        let Some(url) = request.callback_url.as_deref() else {
            return;
        };
        let payload = serde_json::json!({
            "id": request.id,
            "status": request.status,
            "error": request.error,
        });
        match self.http.post(url).json(&payload).send().await {
            Ok(response) => {
                debug!(id = %request.id, status = %response.status(), "import callback delivered");
            }
            Err(err) => {
                debug!(id = %request.id, error = %err, "import callback failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_fails_only_stalled_processing_requests() {
        let intake = ImportIntake::new();
        let mut stalled = ImportRequest::magnet("magnet:?xt=urn:btih:a", "radarr");
        stalled.status = ImportStatus::Processing;
        stalled.created_at = Utc::now() - chrono::Duration::minutes(30);
        let fresh_id;
        {
            let mut fresh = ImportRequest::magnet("magnet:?xt=urn:btih:b", "radarr");
            fresh.status = ImportStatus::Processing;
            fresh_id = fresh.id;
            let mut ledger = intake.ledger.lock().await;
            ledger.insert(stalled.id, stalled.clone());
            ledger.insert(fresh.id, fresh);
        }

        assert_eq!(intake.sweep_stalled().await, 1);
        let swept = intake.get(stalled.id).await.expect("present");
        assert_eq!(swept.status, ImportStatus::Failed);
        assert!(swept.error.is_some());
        let fresh = intake.get(fresh_id).await.expect("present");
        assert_eq!(fresh.status, ImportStatus::Processing);
    }
}
