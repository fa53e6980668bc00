use std::{
    collections::HashSet,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration
};

use serde_json::Value;
use tokio::time::Instant;

/// One cached result with its access metadata.
///
/// Access metadata is atomic so hits only need a shared lock on the map.
/// Recency is a tick of the owning cache's logical clock, which keeps LRU
/// order strict even when accesses share the same instant.
#[derive(Debug)]
pub(crate) struct CacheEntry {
    pub(crate) repr:       String,
    pub(crate) data:       Value,
    pub(crate) created_at: Instant,
    pub(crate) ttl:        Duration,
    pub(crate) tags:       HashSet<String>,
    pub(crate) size:       usize,
    last_accessed:         AtomicU64,
    access_count:          AtomicU64
}

impl CacheEntry {
    pub(crate) fn new(
        repr: String,
        data: Value,
        ttl: Duration,
        tags: HashSet<String>,
        tick: u64
    ) -> Self {
        let size = repr.len() + data.to_string().len();
        Self {
            repr,
            data,
            created_at: Instant::now(),
            ttl,
            tags,
            size,
            last_accessed: AtomicU64::new(tick),
            access_count: AtomicU64::new(0)
        }
    }

    /// Valid while `now - created_at <= ttl`
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    /// Record a hit; returns the new access count
    pub(crate) fn touch(&self, tick: u64) -> u64 {
        self.last_accessed.fetch_max(tick, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }
}
