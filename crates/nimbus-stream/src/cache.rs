//! In-memory LRU cache of decoded segment bodies.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use lru::LruCache;

/// Default capacity: 50 MiB of decoded bytes.
pub(crate) const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// One cached decoded segment.
#[derive(Debug, Clone)]
pub struct CachedSegment {
    /// Message-id the body was fetched under.
    pub message_id: String,
    /// Decoded body bytes, shared without copying.
    pub data: Arc<Vec<u8>>,
    /// Decoded size in bytes.
    pub decoded_size: u64,
    /// Size declared by the yEnc headers.
    pub declared_size: u64,
    /// When the entry was inserted.
    pub cached_at: DateTime<Utc>,
    /// Number of cache hits.
    pub access_count: u64,
    /// Last hit time; the eviction key.
    pub last_access: DateTime<Utc>,
}

struct CacheInner {
    map: LruCache<String, CachedSegment>,
    current_size: u64,
}

/// Byte-accounted strict-LRU segment cache, safe for concurrent use.
pub struct SegmentCache {
    inner: Mutex<CacheInner>,
    max_size: u64,
}

impl SegmentCache {
    /// Cache with the default 50 MiB budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_bytes(DEFAULT_MAX_BYTES)
    }

    /// Cache with an explicit byte budget.
    #[must_use]
    pub fn with_max_bytes(max_size: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                // Byte accounting, not entry counting, bounds the cache.
                map: LruCache::unbounded(),
                current_size: 0,
            }),
            max_size,
        }
    }

    /// Look a segment up, bumping its access statistics.
    #[must_use]
    pub fn get(&self, message_id: &str) -> Option<CachedSegment> {
        let mut inner = self.inner.lock().expect("cache lock");
        let entry = inner.map.get_mut(message_id)?;
        entry.access_count += 1;
        entry.last_access = Utc::now();
        Some(entry.clone())
    }

    /// Insert a decoded body, evicting least-recently-used entries until it
    /// fits. Bodies larger than the whole budget are not cached.
    pub fn put(&self, message_id: &str, data: Arc<Vec<u8>>, declared_size: u64) {
        let decoded_size = data.len() as u64;
        if decoded_size > self.max_size {
            return;
        }
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("cache lock");
        if let Some(previous) = inner.map.pop(message_id) {
            inner.current_size -= previous.decoded_size;
        }
        while inner.current_size + decoded_size > self.max_size {
            let Some((_, evicted)) = inner.map.pop_lru() else {
                break;
            };
            inner.current_size -= evicted.decoded_size;
        }
        inner.map.push(
            message_id.to_owned(),
            CachedSegment {
                message_id: message_id.to_owned(),
                data,
                decoded_size,
                declared_size,
                cached_at: now,
                access_count: 0,
                last_access: now,
            },
        );
        inner.current_size += decoded_size;
    }

    /// Drop one entry.
    pub fn delete(&self, message_id: &str) {
        let mut inner = self.inner.lock().expect("cache lock");
        if let Some(entry) = inner.map.pop(message_id) {
            inner.current_size -= entry.decoded_size;
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock");
        inner.map.clear();
        inner.current_size = 0;
    }

    /// Bytes currently resident.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.inner.lock().expect("cache lock").current_size
    }

    /// Number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").map.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SegmentCache {
    fn default() -> Self {
        Self::new()
    }
}
