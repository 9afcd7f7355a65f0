//! Configuration options for building and reading tables.

use crate::cache::BlockCache;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::filter::FilterPolicy;
use std::sync::Arc;

/// Default target size of an uncompressed data block (4KB).
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default number of entries between restart points.
pub const DEFAULT_BLOCK_RESTART_INTERVAL: usize = 16;

/// Options controlling table construction and access.
#[derive(Clone)]
pub struct Options {
    /// Comparator defining the key order within a table.
    /// Default: [`BytewiseComparator`]
    pub comparator: Arc<dyn Comparator>,

    /// Target uncompressed size of a data block before it is flushed
    /// (in bytes). Default: 4KB
    pub block_size: usize,

    /// Number of prefix-compressed entries between restart points.
    /// Default: 16
    pub block_restart_interval: usize,

    /// Compression applied to data blocks.
    /// Default: Snappy when the `snappy` feature is enabled
    pub compression: CompressionType,

    /// Verify checksums on metadata reads (footer-adjacent blocks) at open.
    /// Default: false
    pub paranoid_checks: bool,

    /// Filter policy used to skip data-block reads on point lookups.
    /// Default: None
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// Shared cache for uncompressed data blocks.
    /// Default: None
    pub block_cache: Option<Arc<BlockCache>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            block_size: DEFAULT_BLOCK_SIZE,
            block_restart_interval: DEFAULT_BLOCK_RESTART_INTERVAL,
            compression: CompressionType::default(),
            paranoid_checks: false,
            filter_policy: None,
            block_cache: None,
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("comparator", &self.comparator.name())
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("compression", &self.compression)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("filter_policy", &self.filter_policy.as_ref().map(|p| p.name()))
            .field("block_cache", &self.block_cache.is_some())
            .finish()
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the restart interval for data blocks.
    pub fn block_restart_interval(mut self, interval: usize) -> Self {
        self.block_restart_interval = interval;
        self
    }

    /// Sets the compression type.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Enables or disables checksum verification on metadata reads.
    pub fn paranoid_checks(mut self, value: bool) -> Self {
        self.paranoid_checks = value;
        self
    }

    /// Sets the filter policy.
    pub fn filter_policy(mut self, policy: Arc<dyn FilterPolicy>) -> Self {
        self.filter_policy = Some(policy);
        self
    }

    /// Sets the block cache.
    pub fn block_cache(mut self, cache: Arc<BlockCache>) -> Self {
        self.block_cache = Some(cache);
        self
    }

    /// Sets the comparator.
    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.block_size == 0 {
            return Err(crate::Error::invalid_argument("block_size must be > 0"));
        }
        if self.block_restart_interval == 0 {
            return Err(crate::Error::invalid_argument("block_restart_interval must be > 0"));
        }
        Ok(())
    }
}

/// Options controlling a single read operation.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Verify block checksums on every read.
    /// Default: false
    pub verify_checksums: bool,

    /// Insert blocks read for this operation into the block cache.
    /// Default: true
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { verify_checksums: false, fill_cache: true }
    }
}

impl ReadOptions {
    /// Creates a new ReadOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables checksum verification.
    pub fn verify_checksums(mut self, value: bool) -> Self {
        self.verify_checksums = value;
        self
    }

    /// Enables or disables cache fill.
    pub fn fill_cache(mut self, value: bool) -> Self {
        self.fill_cache = value;
        self
    }
}

/// Compression algorithms recognized in block trailers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    None = 0,

    /// Snappy compression (fast, moderate compression ratio).
    #[cfg(feature = "snappy")]
    Snappy = 1,
}

impl CompressionType {
    /// Convert from the trailer byte. Unknown values are corruption.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            #[cfg(feature = "snappy")]
            1 => Some(CompressionType::Snappy),
            _ => None,
        }
    }
}

impl Default for CompressionType {
    fn default() -> Self {
        #[cfg(feature = "snappy")]
        return CompressionType::Snappy;

        #[cfg(not(feature = "snappy"))]
        CompressionType::None
    }
}
