//! Block cache for SSTable data blocks.
//!
//! Provides an LRU (Least Recently Used) cache to speed up repeated reads
//! of the same data blocks, shared by any number of open tables.

mod lru;

pub use lru::{BlockCache, CacheKey, CacheStats};
