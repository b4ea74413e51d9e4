//! Key/value cache capability with per-entry TTL.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// String-keyed cache shared by the rate and idempotency caches.
///
/// Values are opaque strings; callers own the encoding.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open the connection. Idempotent.
    async fn connect(&self) -> StoreResult<()>;

    /// Close the connection. Idempotent.
    async fn close(&self);

    /// Read a live value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value that expires after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()>;

    /// Remove a value if present.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Shared cache handle.
pub type SharedCacheStore = Arc<dyn CacheStore>;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// In-process [`CacheStore`] over a concurrent map.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    connected: AtomicBool,
    max_entries: usize,
}

impl MemoryCache {
    /// Create a disconnected cache.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Create a disconnected cache holding at most `max_entries` keys.
    ///
    /// At capacity, expired entries go first, then the entries closest to
    /// expiry.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            connected: AtomicBool::new(false),
            max_entries,
        }
    }

    /// Create a cache that is already connected.
    pub fn connected() -> Self {
        let cache = Self::new();
        cache.connected.store(true, Ordering::SeqCst);
        cache
    }

    /// Get the number of entries held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict expired entries.
    pub fn evict_expired(&self) {
        self.entries.retain(|_, entry| entry.is_valid());
    }

    fn evict_soonest_expiring(&self) {
        while self.entries.len() >= self.max_entries.max(1) {
            let victim = self
                .entries
                .iter()
                .min_by_key(|entry| entry.expires_at)
                .map(|entry| entry.key().clone());
            let Some(key) = victim else {
                break;
            };
            self.entries.remove(&key);
            debug!(key = %key, "Evicted live cache entry at capacity");
        }
    }

    fn ensure_connected(&self) -> StoreResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::CacheNotConnected)
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn connect(&self) -> StoreResult<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            debug!("Cache connected");
        }
        Ok(())
    }

    async fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.entries.clear();
            debug!("Cache closed");
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_connected()?;

        if let Some(entry) = self.entries.get(key) {
            if entry.is_valid() {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.entries.remove(key);
            debug!(key, "Cache entry expired");
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        self.ensure_connected()?;

        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.evict_expired();
            self.evict_soonest_expiring();
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Utc::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.ensure_connected()?;
        self.entries.remove(key);
        Ok(())
    }
}
