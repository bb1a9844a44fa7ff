//! Content-addressed embedding cache.
//!
//! Keys are SHA-256 digests of normalized text, so two cards with the same
//! content share one entry. Entries expire after their TTL (checked lazily on
//! read) and the least recently used entry is evicted when capacity is hit.
//! Both policies read metadata from the same `LruCache` slot; there is no
//! secondary index to keep in sync.
//!
//! Losing the cache is never a correctness problem, only a recompute.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;

use super::normalize::{content_hash, hash_hex, ContentHash};

/// A cached vector and the metadata deciding its lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingCacheEntry {
    pub content_hash: ContentHash,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl EmbeddingCacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at).num_seconds();
        age > self.ttl_secs.min(i64::MAX as u64) as i64
    }
}

pub struct EmbeddingCache {
    entries: Mutex<LruCache<ContentHash, EmbeddingCacheEntry>>,
    default_ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(capacity: NonZeroUsize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up the vector for `text`. Blank text and expired entries are misses.
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let hash = content_hash(text)?;
        self.get_by_hash(&hash, Utc::now())
    }

    pub fn put(&self, text: &str, vector: Vec<f32>, ttl: Duration) {
        let Some(hash) = content_hash(text) else {
            return;
        };
        self.put_by_hash(hash, vector, ttl, Utc::now());
    }

    /// Drop the entry for `text`. Returns whether one was present.
    pub fn invalidate(&self, text: &str) -> bool {
        match content_hash(text) {
            Some(hash) => self.invalidate_hash(&hash),
            None => false,
        }
    }

    pub fn get_by_hash(&self, hash: &ContentHash, now: DateTime<Utc>) -> Option<Vec<f32>> {
        let mut entries = self.lock();

        let expired = entries.peek(hash)?.is_expired_at(now);
        if expired {
            entries.pop(hash);
            return None;
        }

        entries.get(hash).map(|entry| entry.vector.clone())
    }

    pub fn put_by_hash(&self, hash: ContentHash, vector: Vec<f32>, ttl: Duration, now: DateTime<Utc>) {
        let entry = EmbeddingCacheEntry {
            content_hash: hash,
            vector,
            created_at: now,
            ttl_secs: ttl.as_secs(),
        };
        self.insert_entry(entry);
    }

    pub fn invalidate_hash(&self, hash: &ContentHash) -> bool {
        self.lock().pop(hash).is_some()
    }

    /// Remove every expired entry. Reads already evict lazily; this only
    /// bounds memory held by entries nobody asks for again.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let expired: Vec<ContentHash> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(hash, _)| *hash)
            .collect();

        for hash in &expired {
            entries.pop(hash);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy out live entries, least recently used first so that
    /// [`EmbeddingCache::restore`] reproduces the recency order.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<EmbeddingCacheEntry> {
        let entries = self.lock();
        let mut live: Vec<EmbeddingCacheEntry> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(_, entry)| entry.clone())
            .collect();
        live.reverse();
        live
    }

    /// Insert previously snapshotted entries, keeping their original timestamps.
    pub fn restore(&self, snapshot: Vec<EmbeddingCacheEntry>, now: DateTime<Utc>) -> usize {
        let mut restored = 0;
        for entry in snapshot {
            if entry.is_expired_at(now) {
                continue;
            }
            self.insert_entry(entry);
            restored += 1;
        }
        restored
    }

    fn insert_entry(&self, entry: EmbeddingCacheEntry) {
        let key = entry.content_hash;
        let mut entries = self.lock();
        if let Some((evicted, _)) = entries.push(key, entry) {
            if evicted != key {
                log::trace!("evicted least recently used embedding {}", hash_hex(&evicted));
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<ContentHash, EmbeddingCacheEntry>> {
        // Entries are plain data; a panic mid-update cannot leave them torn.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::normalize::hash_normalized;

    fn cache(capacity: usize) -> EmbeddingCache {
        EmbeddingCache::new(
            NonZeroUsize::new(capacity).unwrap(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_put_then_get_hits() {
        let cache = cache(4);
        cache.put("sourdough baking tips", vec![1.0, 0.0], Duration::from_secs(60));

        assert_eq!(cache.get("sourdough baking tips"), Some(vec![1.0, 0.0]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_ignores_formatting() {
        let cache = cache(4);
        cache.put("Sourdough  Baking tips", vec![1.0, 0.0], Duration::from_secs(60));

        assert_eq!(cache.get("  sourdough baking\ttips "), Some(vec![1.0, 0.0]));
    }

    #[test]
    fn test_miss_on_unknown_or_blank_text() {
        let cache = cache(4);
        assert_eq!(cache.get("never seen"), None);

        cache.put("   ", vec![1.0], Duration::from_secs(60));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = cache(4);
        cache.put("quarterly tax filing", vec![0.0, 1.0], Duration::from_secs(60));

        assert!(cache.invalidate("quarterly tax filing"));
        assert_eq!(cache.get("quarterly tax filing"), None);
        assert!(!cache.invalidate("quarterly tax filing"));
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_is_removed() {
        let cache = cache(4);
        let hash = hash_normalized("bread");
        let created = Utc::now() - chrono::Duration::seconds(120);
        cache.put_by_hash(hash, vec![1.0], Duration::from_secs(60), created);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_by_hash(&hash, Utc::now()), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_entry_valid_up_to_ttl_boundary() {
        let cache = cache(4);
        let hash = hash_normalized("bread");
        let created = Utc::now();
        cache.put_by_hash(hash, vec![1.0], Duration::from_secs(60), created);

        let at_boundary = created + chrono::Duration::seconds(60);
        assert_eq!(cache.get_by_hash(&hash, at_boundary), Some(vec![1.0]));

        let past = created + chrono::Duration::seconds(61);
        assert_eq!(cache.get_by_hash(&hash, past), None);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = cache(2);
        let ttl = Duration::from_secs(60);
        cache.put("a", vec![1.0], ttl);
        cache.put("b", vec![2.0], ttl);

        // touch "a" so "b" becomes least recently used
        assert!(cache.get("a").is_some());
        cache.put("c", vec![3.0], ttl);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_purge_expired() {
        let cache = cache(8);
        let old = Utc::now() - chrono::Duration::seconds(600);
        cache.put_by_hash(hash_normalized("old"), vec![1.0], Duration::from_secs(10), old);
        cache.put("fresh", vec![2.0], Duration::from_secs(600));

        assert_eq!(cache.purge_expired(Utc::now()), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_snapshot_restore_keeps_recency_and_skips_expired() {
        let source = cache(8);
        let ttl = Duration::from_secs(600);
        source.put("first", vec![1.0], ttl);
        source.put("second", vec![2.0], ttl);
        let old = Utc::now() - chrono::Duration::seconds(600);
        source.put_by_hash(hash_normalized("stale"), vec![3.0], Duration::from_secs(1), old);

        let snapshot = source.snapshot(Utc::now());
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].vector, vec![1.0]);

        let target = cache(1);
        assert_eq!(target.restore(snapshot, Utc::now()), 2);
        // capacity 1: the most recently used entry survives
        assert_eq!(target.get("second"), Some(vec![2.0]));
        assert_eq!(target.get("first"), None);
    }
}
