//! In-process URL cache with LRU eviction and per-entry expiry.

use std::{
    num::NonZeroUsize,
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;

use crate::application::ports::{CacheError, UrlCache};
use crate::config::CacheSettings;

use super::keys::CacheKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";
const DEFAULT_CAPACITY: usize = 10_000;
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct MemoryUrlCacheConfig {
    /// Maximum number of entries before the least recently used is evicted.
    pub capacity: usize,
    /// Entry lifetime; `None` keeps entries until evicted or deleted.
    pub ttl: Option<Duration>,
}

impl Default for MemoryUrlCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl: Some(DEFAULT_TTL),
        }
    }
}

impl From<&CacheSettings> for MemoryUrlCacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            capacity: settings.capacity.get(),
            ttl: settings.ttl,
        }
    }
}

impl MemoryUrlCacheConfig {
    fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

struct Entry {
    address: String,
    stored_at: Instant,
}

pub struct MemoryUrlCache {
    entries: Mutex<LruCache<CacheKey, Entry>>,
    ttl: Option<Duration>,
}

impl MemoryUrlCache {
    pub fn new(config: &MemoryUrlCacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.capacity_non_zero())),
            ttl: config.ttl,
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.ttl.is_some_and(|ttl| entry.stored_at.elapsed() >= ttl)
    }
}

#[async_trait]
impl UrlCache for MemoryUrlCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "lookup");
        let expired = match entries.get(key) {
            Some(entry) if !self.is_expired(entry) => {
                counter!("derivo_cache_hit_total").increment(1);
                return Ok(Some(entry.address.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        counter!("derivo_cache_miss_total").increment(1);
        Ok(None)
    }

    async fn set(&self, key: CacheKey, address: String) -> Result<(), CacheError> {
        mutex_lock(&self.entries, SOURCE, "set").put(
            key,
            Entry {
                address,
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        mutex_lock(&self.entries, SOURCE, "delete").pop(key);
        Ok(())
    }
}
