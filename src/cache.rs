//! In-memory TTL cache for query results.
//!
//! Entries expire after their TTL, are evicted least-recently-accessed
//! first when the cache is full and can be dropped in bulk by tag. A
//! background sweeper removes expired entries nobody reads anymore.

mod call;
mod entry;
mod key;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering}
    },
    time::Duration
};

pub use call::cached_call;
pub use key::CacheKey;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use self::entry::CacheEntry;
use crate::{config::CacheConfig, db::SqlValue, worker::Worker};

/// Empty tag set for entries that are only invalidated by TTL or pattern
pub const NO_TAGS: [&str; 0] = [];

/// Cache counters and occupancy
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub size:          usize,
    pub max_size:      usize,
    pub hit_rate:      f64,
    pub hits:          u64,
    pub misses:        u64,
    pub evictions:     u64,
    pub invalidations: u64,
    /// Approximate bytes held by keys and serialized payloads
    pub memory_usage:  usize
}

/// TTL + LRU query result cache
pub struct QueryCache {
    max_size:       usize,
    default_ttl:    Duration,
    sweep_interval: Duration,
    entries:        RwLock<HashMap<String, CacheEntry>>,
    clock:          AtomicU64,
    hits:           AtomicU64,
    misses:         AtomicU64,
    evictions:      AtomicU64,
    invalidations:  AtomicU64,
    sweeper:        Mutex<Option<Worker>>
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            max_size,
            default_ttl: config.default_ttl(),
            sweep_interval: config.sweep_interval(),
            entries: RwLock::new(HashMap::with_capacity(max_size.min(4096))),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            sweeper: Mutex::new(None)
        }
    }

    /// Spawn the background expiry sweep. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let cache: Weak<Self> = Arc::downgrade(self);
        *sweeper = Some(Worker::spawn("cache-sweeper", self.sweep_interval, move || {
            let cache = cache.clone();
            async move {
                if let Some(cache) = cache.upgrade() {
                    cache.sweep_expired();
                }
            }
        }));
        info!(interval = ?self.sweep_interval, "Query cache sweeper started");
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Cached result of `query` with `params`, if present and fresh
    pub fn get(&self, query: &str, params: &[SqlValue]) -> Option<Value> {
        self.get_key(&CacheKey::new(query, params))
    }

    /// Cached value under `key`, if present and fresh.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get_key(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key.digest()) {
                Some(entry) if !entry.is_expired(now) => {
                    let accesses = entry.touch(self.tick());
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, accesses, "Cache hit");
                    return Some(entry.data.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        let mut entries = self.entries.write();
        if entries
            .get(key.digest())
            .is_some_and(|entry| entry.is_expired(now))
        {
            entries.remove(key.digest());
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `data` as the result of `query` with `params`.
    ///
    /// `ttl` defaults to the configured default TTL.
    pub fn set<I, S>(
        &self,
        query: &str,
        data: Value,
        params: &[SqlValue],
        ttl: Option<Duration>,
        tags: I
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.set_key(&CacheKey::new(query, params), data, ttl, tags);
    }

    /// Store `data` under `key`.
    ///
    /// When the cache is full and `key` is new, the least recently accessed
    /// tenth of the entries (at least one) is evicted first.
    pub fn set_key<I, S>(&self, key: &CacheKey, data: Value, ttl: Option<Duration>, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let tags: HashSet<String> = tags.into_iter().map(Into::into).collect();
        let entry = CacheEntry::new(key.repr().to_string(), data, ttl, tags, self.tick());

        let mut entries = self.entries.write();
        if !entries.contains_key(key.digest()) && entries.len() >= self.max_size {
            let evicted = evict_lru(&mut entries, (self.max_size / 10).max(1));
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, "Evicted least recently used cache entries");
        }
        entries.insert(key.digest().to_string(), entry);
        debug!(key = %key, ?ttl, "Cached query result");
    }

    /// Drop every entry carrying at least one of `tags`
    pub fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let removed = self.remove_where(|entry| {
            tags.iter()
                .any(|tag| entry.tags.contains(tag.as_ref()))
        });
        if removed > 0 {
            info!(removed, "Invalidated cache entries by tag");
        }
        removed
    }

    /// Drop every entry whose key representation contains `pattern`,
    /// ignoring case.
    ///
    /// Coarse: the representation includes both query text and parameters.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        let pattern = pattern.to_lowercase();
        let removed = self.remove_where(|entry| entry.repr.to_lowercase().contains(&pattern));
        if removed > 0 {
            info!(removed, pattern = %pattern, "Invalidated cache entries by pattern");
        }
        removed
    }

    fn remove_where(&self, predicate: impl Fn(&CacheEntry) -> bool) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !predicate(entry));
        let removed = before - entries.len();
        self.invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Remove expired entries once; returns how many were removed.
    ///
    /// Expired keys are collected under a shared lock and deleted one at a
    /// time so concurrent readers are never blocked for a full pass.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(digest, _)| digest.clone())
            .collect();

        let mut removed = 0;
        for digest in expired {
            let mut entries = self.entries.write();
            if entries
                .get(&digest)
                .is_some_and(|entry| entry.is_expired(now))
            {
                entries.remove(&digest);
                removed += 1;
            }
        }
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    /// Drop every entry and reset the counters
    pub fn clear(&self) {
        self.entries.write().clear();
        for counter in [&self.hits, &self.misses, &self.evictions, &self.invalidations] {
            counter.store(0, Ordering::Relaxed);
        }
        info!("Query cache cleared");
    }

    pub fn get_stats(&self) -> CacheStats {
        let (size, memory_usage) = {
            let entries = self.entries.read();
            (entries.len(), entries.values().map(|e| e.size).sum())
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            size,
            max_size: self.max_size,
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            memory_usage
        }
    }

    /// Stop the sweeper and drop every entry
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
        self.entries.write().clear();
        info!("Query cache shut down");
    }
}

fn evict_lru(entries: &mut HashMap<String, CacheEntry>, count: usize) -> usize {
    let mut by_recency: Vec<(u64, String)> = entries
        .iter()
        .map(|(digest, entry)| (entry.last_accessed(), digest.clone()))
        .collect();
    by_recency.sort_unstable();
    by_recency
        .into_iter()
        .take(count)
        .filter(|(_, digest)| entries.remove(digest).is_some())
        .count()
}
