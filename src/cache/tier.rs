//! One cache tier: sharded LRU with sliding TTL.
//!
//! # Responsibilities
//! - Bound the number of entries (least recently used evicted first)
//! - Expire entries that were not touched for `ttl`, checked lazily on access
//! - Renew the TTL on every hit
//!
//! # Design Decisions
//! - Keys are 32-byte digests; the first 8 bytes pick the shard
//! - Each shard has its own lock, so contention stays within one shard
//! - Capacity is split evenly across shards (rounded up)

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::cache::{CacheTier, OperationKey};

#[derive(Debug)]
struct Entry<V> {
    value: V,
    last_accessed_at: Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_accessed_at) >= self.ttl
    }
}

/// Hit/miss counters of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct CacheStorage<V> {
    tier: CacheTier,
    shards: Vec<Mutex<LruCache<OperationKey, Entry<V>>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> CacheStorage<V> {
    pub fn new(tier: CacheTier, capacity: usize, ttl: Duration, shards: usize) -> Self {
        let shard_count = shards.clamp(1, capacity.max(1));
        let per_shard = NonZeroUsize::new(capacity.div_ceil(shard_count)).unwrap_or(NonZeroUsize::MIN);
        Self {
            tier,
            shards: (0..shard_count)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn tier(&self) -> CacheTier {
        self.tier
    }

    fn shard(&self, key: &OperationKey) -> &Mutex<LruCache<OperationKey, Entry<V>>> {
        let index = key.shard_hint() % self.shards.len() as u64;
        &self.shards[index as usize]
    }

    /// Look up `key`, renewing its TTL on a hit.
    pub fn get(&self, key: &OperationKey) -> Option<V> {
        let now = Instant::now();
        let mut shard = self.shard(key).lock();

        let value = match shard.peek(key).map(|entry| entry.is_expired(now)) {
            Some(false) => shard.get_mut(key).map(|entry| {
                entry.last_accessed_at = now;
                entry.value.clone()
            }),
            Some(true) => {
                shard.pop(key);
                None
            }
            None => None,
        };
        drop(shard);

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Insert with the tier's TTL.
    pub fn put(&self, key: OperationKey, value: V) {
        self.put_with_ttl(key, value, self.ttl);
    }

    pub fn put_with_ttl(&self, key: OperationKey, value: V, ttl: Duration) {
        let now = Instant::now();
        let entry = Entry {
            value,
            last_accessed_at: now,
            ttl,
        };
        if let Some((evicted, _)) = self.shard(&key).lock().push(key, entry) {
            if evicted != key {
                tracing::trace!(tier = self.tier.as_str(), key = %evicted, "Evicted cache entry");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
