//! Snapshot storage.
//!
//! [`SnapshotStore`] is the seam between the filter and whatever holds the
//! snapshots. [`MemoryStore`] is the in-process implementation: an LRU map
//! with a fixed time-to-live. The LRU bound stands in for memory-pressure
//! eviction, so callers must treat a vanished entry exactly like a miss.

use crate::config::CacheFilterConfig;
use crate::error::CacheResult;
use crate::key::CacheKey;
use crate::snapshot::ResponseSnapshot;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use replica_core::logging::{debug, trace};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Storage backend for response snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Fresh snapshot stored under `key`, if any.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Arc<ResponseSnapshot>>>;

    /// Store `snapshot` under `key`, replacing any previous entry.
    async fn put(&self, key: CacheKey, snapshot: Arc<ResponseSnapshot>) -> CacheResult<()>;

    /// Number of entries held, expired or not.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn clear(&self) -> CacheResult<()>;

    /// Drop every expired entry. Returns how many were removed.
    async fn purge_expired(&self) -> CacheResult<usize>;
}

struct Entry {
    snapshot: Arc<ResponseSnapshot>,
    inserted_at: Instant,
}

impl Entry {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.inserted_at) < ttl
    }
}

/// In-memory LRU snapshot store with a fixed TTL.
///
/// An entry inserted at `T` is served for lookups strictly before `T + ttl`
/// and is gone from then on. Expired entries are removed when looked up or
/// when [`purge_expired`](SnapshotStore::purge_expired) runs.
pub struct MemoryStore {
    entries: Mutex<LruCache<CacheKey, Entry>>,
    ttl: Duration,
    evictions: AtomicU64,
}

impl MemoryStore {
    /// Store with the given TTL, holding at most `capacity` entries.
    /// `None` leaves the store unbounded.
    pub fn new(ttl: Duration, capacity: Option<NonZeroUsize>) -> Self {
        let entries = match capacity {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            entries: Mutex::new(entries),
            ttl,
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheFilterConfig) -> Self {
        Self::new(config.ttl(), config.capacity())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entries pushed out by the capacity bound.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("MemoryStore")
            .field("len", &entries.len())
            .field("cap", &entries.cap())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Arc<ResponseSnapshot>>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.is_fresh(now, self.ttl) => {
                return Ok(Some(Arc::clone(&entry.snapshot)));
            }
            Some(_) => {}
            None => return Ok(None),
        }

        entries.pop(key);
        trace!(key = %key, "Expired snapshot dropped");
        Ok(None)
    }

    async fn put(&self, key: CacheKey, snapshot: Arc<ResponseSnapshot>) -> CacheResult<()> {
        let entry = Entry {
            snapshot,
            inserted_at: Instant::now(),
        };

        let mut entries = self.entries.lock();
        if let Some((displaced, _)) = entries.push(key.clone(), entry) {
            if displaced != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(evicted = %displaced, size = entries.len(), "Capacity reached, evicted least recently used snapshot");
            }
        }
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.lock().len()
    }

    async fn clear(&self) -> CacheResult<()> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn purge_expired(&self) -> CacheResult<usize> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(now, self.ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        Ok(expired.len())
    }
}
