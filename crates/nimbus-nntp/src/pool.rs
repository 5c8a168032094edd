//! Fixed-size connection pool for one provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{NntpError, NntpResult};

/// Connection settings for one Usenet provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Provider name used in logs and the client's pool map.
    pub name: String,
    /// Server hostname.
    pub address: String,
    /// Server port.
    pub port: u16,
    /// Dial with implicit TLS.
    pub ssl: bool,
    /// Upgrade with `STARTTLS` after the greeting.
    pub use_tls: bool,
    /// Username for `AUTHINFO USER`, empty to skip authentication.
    pub username: String,
    /// Password for `AUTHINFO PASS`.
    pub password: String,
    /// Number of connections the pool maintains.
    pub max_connections: usize,
}

struct PoolShared {
    settings: ProviderSettings,
    tx: mpsc::Sender<Connection>,
    rx: Mutex<mpsc::Receiver<Connection>>,
    total: AtomicUsize,
    active: AtomicUsize,
    closed: AtomicBool,
}

/// Capacity-bounded pool of NNTP connections for a single provider.
///
/// Construction opens `max_connections` in parallel and succeeds as long as
/// at least one session is established; the rest are logged and skipped.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    /// Open the pool's connections and report how many were established.
    ///
    /// # Errors
    ///
    /// Returns the last connection error when not a single session could be
    /// established.
    pub async fn connect(settings: ProviderSettings) -> NntpResult<Self> {
        let attempts =
            join_all((0..settings.max_connections).map(|_| Connection::connect(&settings))).await;

        let (tx, rx) = mpsc::channel(settings.max_connections.max(1));
        let mut established = 0_usize;
        let mut last_error = None;
        for attempt in attempts {
            match attempt {
                Ok(connection) => {
                    established += 1;
                    // Capacity equals the attempt count, so this never fails.
                    let _ = tx.try_send(connection);
                }
                Err(err) => {
                    warn!(provider = %settings.name, error = %err, "pool connection failed");
                    last_error = Some(err);
                }
            }
        }
        if established == 0 {
            return Err(last_error.unwrap_or(NntpError::NoAvailableConnection));
        }
        debug!(
            provider = %settings.name,
            established,
            requested = settings.max_connections,
            "nntp pool ready"
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                settings,
                tx,
                rx: Mutex::new(rx),
                total: AtomicUsize::new(established),
                active: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Provider name this pool serves.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.settings.name
    }

    /// Configured pool capacity.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.shared.settings.max_connections
    }

    /// Whether a checkout would currently not have to wait.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.shared.active.load(Ordering::Acquire) < self.shared.settings.max_connections
    }

    /// Connections currently checked out.
    #[must_use]
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Connections currently managed by the pool.
    #[must_use]
    pub fn total(&self) -> usize {
        self.shared.total.load(Ordering::Acquire)
    }

    /// Check a connection out, health-probing it first.
    ///
    /// A connection failing its `DATE` ping is closed and replaced
    /// transparently; the caller only observes a healthy session or an
    /// error.
    ///
    /// # Errors
    ///
    /// [`NntpError::Timeout`] when `deadline` expires waiting for a free
    /// connection, [`NntpError::PoolClosed`] after [`Self::close`].
    pub async fn get(&self, deadline: Duration) -> NntpResult<Connection> {
        let deadline = tokio::time::Instant::now() + deadline;
        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(NntpError::PoolClosed);
            }
            let mut rx = match timeout_at(deadline, self.shared.rx.lock()).await {
                Some(guard) => guard,
                None => return Err(NntpError::Timeout { operation: "checkout" }),
            };
            let received = match timeout_at(deadline, rx.recv()).await {
                Some(received) => received,
                None => return Err(NntpError::Timeout { operation: "checkout" }),
            };
            drop(rx);
            let Some(mut connection) = received else {
                return Err(NntpError::PoolClosed);
            };

            self.shared.active.fetch_add(1, Ordering::AcqRel);
            match connection.ping().await {
                Ok(()) => return Ok(connection),
                Err(err) => {
                    debug!(provider = %self.name(), error = %err, "replacing dead connection");
                    drop(connection);
                    match Connection::connect(&self.shared.settings).await {
                        Ok(replacement) => return Ok(replacement),
                        Err(err) => {
                            // Replacement failed; shrink the pool and try to
                            // take another connection within the deadline.
                            self.shared.active.fetch_sub(1, Ordering::AcqRel);
                            self.shared.total.fetch_sub(1, Ordering::AcqRel);
                            warn!(provider = %self.name(), error = %err, "connection replacement failed");
                            if self.shared.total.load(Ordering::Acquire) == 0 {
                                return Err(err);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Return a connection to the pool without blocking.
    ///
    /// When the queue is somehow full, the oldest waiting connection is
    /// displaced and closed in favour of the returned one; if that is still
    /// impossible within one second the returned connection is closed.
    pub async fn put(&self, connection: Connection) {
        self.shared
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                Some(active.saturating_sub(1))
            })
            .ok();
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        let Err(mpsc::error::TrySendError::Full(connection)) =
            self.shared.tx.try_send(connection)
        else {
            return;
        };
        // Should not happen: more returns than checkouts. Displace the
        // oldest waiting connection so the freshest session survives.
        if let Ok(mut rx) = self.shared.rx.try_lock() {
            if rx.try_recv().is_ok() {
                self.shared.total.fetch_sub(1, Ordering::AcqRel);
            }
        }
        match timeout(Duration::from_secs(1), self.shared.tx.send(connection)).await {
            Ok(Ok(())) => {}
            _ => {
                self.shared.total.fetch_sub(1, Ordering::AcqRel);
                warn!(provider = %self.name(), "discarding connection returned to a full pool");
            }
        }
    }

    /// Hand back a connection on a blocking-capable path.
    ///
    /// Used by the client's drop guard, which cannot await; the fast path is
    /// the same `try_send` as [`Self::put`].
    pub(crate) fn put_from_guard(self, connection: Connection) {
        let shared = Arc::clone(&self.shared);
        shared
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                Some(active.saturating_sub(1))
            })
            .ok();
        if shared.closed.load(Ordering::Acquire) {
            return;
        }
        if let Err(mpsc::error::TrySendError::Full(connection)) = shared.tx.try_send(connection) {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let pool = Self { shared };
                handle.spawn(async move {
                    // Active was already decremented above; compensate so
                    // `put` does not decrement twice.
                    pool.shared.active.fetch_add(1, Ordering::AcqRel);
                    pool.put(connection).await;
                });
            }
        }
    }

    /// Drop a connection that must not be reused and open a replacement in
    /// the background so the pool does not shrink permanently.
    pub(crate) fn discard(&self, connection: Connection) {
        self.shared
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                Some(active.saturating_sub(1))
            })
            .ok();
        self.shared.total.fetch_sub(1, Ordering::AcqRel);
        warn!(provider = %self.name(), "discarding desynced connection");
        drop(connection);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = Arc::clone(&self.shared);
            handle.spawn(async move {
                if shared.closed.load(Ordering::Acquire) {
                    return;
                }
                match Connection::connect(&shared.settings).await {
                    Ok(replacement) => {
                        if shared.tx.try_send(replacement).is_ok() {
                            shared.total.fetch_add(1, Ordering::AcqRel);
                        }
                    }
                    Err(err) => {
                        warn!(provider = %shared.settings.name, error = %err, "replacement connect failed");
                    }
                }
            });
        }
    }

    /// Mark the pool closed and drop every idle connection.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let mut rx = self.shared.rx.lock().await;
        while rx.try_recv().is_ok() {
            self.shared.total.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

async fn timeout_at<F: Future>(deadline: tokio::time::Instant, future: F) -> Option<F::Output> {
    tokio::time::timeout_at(deadline, future).await.ok()
}
