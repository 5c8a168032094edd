//! Provider failover client.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tracing::debug;

use crate::connection::Connection;
use crate::error::{NntpError, NntpResult};
use crate::pool::{Pool, ProviderSettings};

/// Hard ceiling imposed on every checkout on top of the caller's deadline.
const CHECKOUT_CEILING: Duration = Duration::from_secs(5);

/// Ordered collection of provider pools with round-robin fallback.
pub struct Client {
    providers: Vec<Pool>,
    by_name: HashMap<String, Pool>,
}

/// A checked-out connection that returns itself to its pool on drop.
pub struct PooledConnection {
    connection: Option<Connection>,
    pool: Pool,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection
            .as_ref()
            .expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection
            .as_mut()
            .expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            // A connection abandoned mid-command is desynced; reusing it
            // would hand the next caller a stale response.
            if connection.is_clean() {
                self.pool.clone().put_from_guard(connection);
            } else {
                self.pool.discard(connection);
            }
        }
    }
}

impl Client {
    /// Build pools for every provider, in configured order.
    ///
    /// # Errors
    ///
    /// Fails only when no provider pool could establish a single
    /// connection; partial initialisation logs and continues with the
    /// survivors.
    pub async fn connect(providers: Vec<ProviderSettings>) -> NntpResult<Self> {
        let mut pools = Vec::new();
        let mut last_error = None;
        for settings in providers {
            let name = settings.name.clone();
            match Pool::connect(settings).await {
                Ok(pool) => pools.push(pool),
                Err(err) => {
                    debug!(provider = %name, error = %err, "skipping provider");
                    last_error = Some(err);
                }
            }
        }
        if pools.is_empty() {
            return Err(last_error.unwrap_or(NntpError::NoAvailableConnection));
        }
        let by_name = pools
            .iter()
            .map(|pool| (pool.name().to_owned(), pool.clone()))
            .collect();
        Ok(Self {
            providers: pools,
            by_name,
        })
    }

    /// Look up a pool by provider name.
    #[must_use]
    pub fn pool(&self, name: &str) -> Option<&Pool> {
        self.by_name.get(name)
    }

    /// Number of initialised provider pools.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// The smallest pool capacity across initialised providers.
    ///
    /// Bounds the NZB parser's probe parallelism so a probe burst can never
    /// exhaust a provider on its own.
    #[must_use]
    pub fn minimum_max_conns(&self) -> usize {
        self.providers
            .iter()
            .map(Pool::max_connections)
            .min()
            .unwrap_or(1)
    }

    /// Check a connection out of the first available provider.
    ///
    /// Providers are tried in configured order. On the first pass a busy
    /// pool is skipped when more than one provider is configured; the
    /// second pass performs a blocking checkout from each in turn. Pool
    /// exhaustion and deadline errors fall through to the next provider;
    /// anything else surfaces immediately.
    ///
    /// # Errors
    ///
    /// [`NntpError::NoAvailableConnection`] when both passes exhaust every
    /// provider inside the 5 s ceiling.
    pub async fn get_connection(&self) -> NntpResult<PooledConnection> {
        let started = tokio::time::Instant::now();
        let budget = |spent: Duration| CHECKOUT_CEILING.saturating_sub(spent);

        for pass in 0..2_u8 {
            for pool in &self.providers {
                if pass == 0 && self.providers.len() > 1 && !pool.is_free() {
                    continue;
                }
                let remaining = budget(started.elapsed());
                if remaining.is_zero() {
                    return Err(NntpError::NoAvailableConnection);
                }
                match pool.get(remaining).await {
                    Ok(connection) => {
                        return Ok(PooledConnection {
                            connection: Some(connection),
                            pool: pool.clone(),
                        });
                    }
                    Err(
                        NntpError::NoAvailableConnection
                        | NntpError::Timeout { .. }
                        | NntpError::PoolClosed,
                    ) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Err(NntpError::NoAvailableConnection)
    }

    /// Close every pool and drop the idle connections.
    pub async fn close(&self) {
        for pool in &self.providers {
            pool.close().await;
        }
    }
}
