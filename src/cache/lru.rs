//! LRU (Least Recently Used) cache implementation for block caching.
//!
//! This module provides a thread-safe LRU cache for uncompressed data
//! blocks, shared between every table opened against the same cache.

use crate::sstable::block::Block;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A unique identifier for a cached block.
///
/// Combines the owning table's cache id with the block's file offset, so
/// blocks from different tables never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Cache id of the table that read the block.
    pub cache_id: u64,
    /// Offset of the block in its table file.
    pub offset: u64,
}

impl CacheKey {
    /// Create a new cache key.
    pub fn new(cache_id: u64, offset: u64) -> Self {
        Self { cache_id, offset }
    }

    /// The 16-byte wire form of the key: both fields little-endian.
    ///
    /// Stable across architectures, so cache contents observed in tests or
    /// dumps are byte-identical everywhere.
    pub fn encoded(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.cache_id.to_le_bytes());
        buf[8..].copy_from_slice(&self.offset.to_le_bytes());
        buf
    }
}

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Total number of cache lookups.
    pub lookups: u64,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of insertions.
    pub insertions: u64,
    /// Number of evictions.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

/// Thread-safe LRU cache for uncompressed data blocks.
///
/// A successful [`lookup`](BlockCache::lookup) returns a clone of the
/// cached `Arc<Block>`; the clone pins the block for as long as the caller
/// (typically a block iterator) holds it, so eviction never frees memory a
/// reader is still using.
///
/// # Thread Safety
///
/// The cache is internally synchronized and is shared across tables as
/// `Arc<BlockCache>`.
#[derive(Debug)]
pub struct BlockCache {
    /// Maximum cache charge in bytes.
    capacity: usize,
    /// Sum of the charges of all cached blocks.
    current_size: AtomicU64,
    /// Cache entries stored by key, with the charge recorded at insert.
    cache: RwLock<HashMap<CacheKey, (Arc<Block>, usize)>>,
    /// LRU queue (most recently used at the back).
    lru_queue: RwLock<VecDeque<CacheKey>>,
    /// Cache statistics.
    stats: RwLock<CacheStats>,
    /// Source of per-table cache ids.
    id_counter: AtomicU64,
}

impl BlockCache {
    /// Create a new BlockCache with the specified capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum cache size in bytes. Set to 0 to disable caching.
    ///
    /// # Examples
    ///
    /// ```
    /// use siltdb::cache::BlockCache;
    ///
    /// // Create an 8MB cache
    /// let cache = BlockCache::new(8 * 1024 * 1024);
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            current_size: AtomicU64::new(0),
            cache: RwLock::new(HashMap::new()),
            lru_queue: RwLock::new(VecDeque::new()),
            stats: RwLock::new(CacheStats::default()),
            id_counter: AtomicU64::new(0),
        }
    }

    /// Allocate an id for a newly opened table.
    ///
    /// Ids are never reused for the lifetime of the cache, so blocks of a
    /// closed table simply age out without colliding with a new table's.
    pub fn new_id(&self) -> u64 {
        self.id_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up a block, pinning it for the caller on a hit.
    ///
    /// Updates the LRU order, moving the accessed entry to the most
    /// recently used position.
    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<Block>> {
        {
            let mut stats = self.stats.write();
            stats.lookups += 1;
        }

        if self.capacity == 0 {
            return None;
        }

        let cache = self.cache.read();
        if let Some((block, _)) = cache.get(key) {
            let result = Arc::clone(block);
            drop(cache); // Release read lock before reordering the queue

            self.touch(key);

            {
                let mut stats = self.stats.write();
                stats.hits += 1;
            }

            Some(result)
        } else {
            drop(cache);
            {
                let mut stats = self.stats.write();
                stats.misses += 1;
            }
            None
        }
    }

    /// Insert a block with the given charge, returning a pinned reference.
    ///
    /// If the cache is at capacity, least recently used blocks are evicted
    /// to make room. Blocks whose charge exceeds the whole capacity are not
    /// cached; the returned reference is the only one.
    pub fn insert(&self, key: CacheKey, block: Arc<Block>, charge: usize) -> Arc<Block> {
        if self.capacity == 0 || charge > self.capacity {
            return block;
        }

        while self.current_size.load(Ordering::Relaxed) as usize + charge > self.capacity {
            if !self.evict_one() {
                break;
            }
        }

        let mut cache = self.cache.write();
        let mut lru_queue = self.lru_queue.write();

        if let Some((_, old_charge)) = cache.get(&key) {
            self.current_size.fetch_sub(*old_charge as u64, Ordering::Relaxed);
            lru_queue.retain(|k| k != &key);
        }

        cache.insert(key, (Arc::clone(&block), charge));
        lru_queue.push_back(key);
        self.current_size.fetch_add(charge as u64, Ordering::Relaxed);

        drop(cache);
        drop(lru_queue);
        {
            let mut stats = self.stats.write();
            stats.insertions += 1;
        }

        block
    }

    /// Remove a specific entry, dropping the cache's reference to it.
    pub fn erase(&self, key: &CacheKey) {
        let mut cache = self.cache.write();
        let mut lru_queue = self.lru_queue.write();
        if let Some((_, charge)) = cache.remove(key) {
            self.current_size.fetch_sub(charge as u64, Ordering::Relaxed);
            lru_queue.retain(|k| k != key);
        }
    }

    /// Move a key to the most recently used position.
    ///
    /// # Performance Note
    ///
    /// This is O(n) in the queue length. For typical capacities (8MB ≈ 2000
    /// blocks) that is acceptable; very large caches would want an
    /// intrusive list instead.
    fn touch(&self, key: &CacheKey) {
        let mut lru_queue = self.lru_queue.write();
        if let Some(pos) = lru_queue.iter().position(|k| k == key) {
            lru_queue.remove(pos);
        }
        lru_queue.push_back(*key);
    }

    /// Evict the least recently used entry. Returns false if empty.
    fn evict_one(&self) -> bool {
        let mut lru_queue = self.lru_queue.write();

        if let Some(key) = lru_queue.pop_front() {
            drop(lru_queue);

            let mut cache = self.cache.write();
            if let Some((_, charge)) = cache.remove(&key) {
                self.current_size.fetch_sub(charge as u64, Ordering::Relaxed);

                drop(cache);
                {
                    let mut stats = self.stats.write();
                    stats.evictions += 1;
                }
            }
            true
        } else {
            false
        }
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        let mut cache = self.cache.write();
        let mut lru_queue = self.lru_queue.write();

        cache.clear();
        lru_queue.clear();
        self.current_size.store(0, Ordering::Relaxed);
    }

    /// Get the total charge of cached data in bytes.
    pub fn size(&self) -> usize {
        self.current_size.load(Ordering::Relaxed) as usize
    }

    /// Get the cache capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    // A minimal valid block: no entries, one restart point at offset 0.
    fn empty_block() -> Arc<Block> {
        let data = Bytes::from_static(&[0, 0, 0, 0, 1, 0, 0, 0]);
        Arc::new(Block::new(data).unwrap())
    }

    #[test]
    fn test_cache_basic_operations() {
        let cache = BlockCache::new(1024);
        let key1 = CacheKey::new(1, 0);

        assert!(cache.lookup(&key1).is_none());

        cache.insert(key1, empty_block(), 4);
        assert!(cache.lookup(&key1).is_some());

        let stats = cache.stats();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.insertions, 1);
    }

    #[test]
    fn test_cache_key_encoding() {
        let key = CacheKey::new(0x0102030405060708, 0x1112131415161718);
        let encoded = key.encoded();
        assert_eq!(&encoded[..8], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&encoded[8..], &[0x18, 0x17, 0x16, 0x15, 0x14, 0x13, 0x12, 0x11]);
    }

    #[test]
    fn test_cache_lru_eviction() {
        // Holds three entries of charge 4
        let cache = BlockCache::new(12);

        let keys: Vec<CacheKey> = (1..=4).map(|i| CacheKey::new(i, 0)).collect();
        for key in &keys[..3] {
            cache.insert(*key, empty_block(), 4);
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.size(), 12);

        // Fourth insert evicts the least recently used entry
        cache.insert(keys[3], empty_block(), 4);

        assert_eq!(cache.len(), 3);
        assert!(cache.lookup(&keys[0]).is_none());
        assert!(cache.lookup(&keys[1]).is_some());
        assert!(cache.lookup(&keys[2]).is_some());
        assert!(cache.lookup(&keys[3]).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_cache_touch_updates_lru() {
        let cache = BlockCache::new(12);

        let keys: Vec<CacheKey> = (1..=4).map(|i| CacheKey::new(i, 0)).collect();
        for key in &keys[..3] {
            cache.insert(*key, empty_block(), 4);
        }

        // Access keys[0] so keys[1] becomes the eviction candidate
        assert!(cache.lookup(&keys[0]).is_some());
        cache.insert(keys[3], empty_block(), 4);

        assert!(cache.lookup(&keys[0]).is_some());
        assert!(cache.lookup(&keys[1]).is_none());
        assert!(cache.lookup(&keys[2]).is_some());
        assert!(cache.lookup(&keys[3]).is_some());
    }

    #[test]
    fn test_pinned_block_survives_eviction() {
        let cache = BlockCache::new(4);
        let key = CacheKey::new(1, 0);

        let pinned = cache.insert(key, empty_block(), 4);

        // Force the entry out
        cache.insert(CacheKey::new(2, 0), empty_block(), 4);
        assert!(cache.lookup(&key).is_none());

        // Our reference is still usable
        assert_eq!(pinned.num_restarts(), 1);
    }

    #[test]
    fn test_cache_erase() {
        let cache = BlockCache::new(1024);
        let key = CacheKey::new(1, 0);

        cache.insert(key, empty_block(), 4);
        assert_eq!(cache.size(), 4);

        cache.erase(&key);
        assert!(cache.lookup(&key).is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_cache_disabled_when_capacity_zero() {
        let cache = BlockCache::new(0);
        let key = CacheKey::new(1, 0);

        cache.insert(key, empty_block(), 4);
        assert!(cache.lookup(&key).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_oversized_charge_not_cached() {
        let cache = BlockCache::new(10);
        let key = CacheKey::new(1, 0);

        cache.insert(key, empty_block(), 100);
        assert!(cache.lookup(&key).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_new_id_monotonic() {
        let cache = BlockCache::new(1024);
        let a = cache.new_id();
        let b = cache.new_id();
        let c = cache.new_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let cache = Arc::new(BlockCache::new(1024));
        let mut handles = vec![];

        for i in 0..10 {
            let cache_clone = Arc::clone(&cache);
            let handle = thread::spawn(move || {
                let key = CacheKey::new(i, 0);
                cache_clone.insert(key, empty_block(), 8);
                assert!(cache_clone.lookup(&key).is_some());
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 10);
    }
}
