//! Filter block construction and probing.
//!
//! A filter block holds one filter bitmap per 2KB range of the data file,
//! so a point lookup can decide from the candidate block's file offset
//! whether reading it can possibly find the key.
//!
//! The sequence of calls to [`FilterBlockBuilder`] must match the regexp:
//! `(start_block add_key*)* finish`.

use crate::filter::FilterPolicy;
use crate::util::coding::{decode_fixed32, put_fixed32};
use bytes::Bytes;
use std::sync::Arc;

/// Generate a new filter every 2^FILTER_BASE_LG bytes of data file.
pub const FILTER_BASE_LG: u8 = 11;
const FILTER_BASE: u64 = 1 << FILTER_BASE_LG;

/// Builds the filter block for one table.
///
/// On-disk layout produced by [`finish`](FilterBlockBuilder::finish):
/// ```text
/// [filter 0]
/// ...
/// [filter N-1]
/// [offset of filter 0: fixed32]
/// ...
/// [offset of filter N-1: fixed32]
/// [offset past filter N-1: fixed32]
/// [N: fixed32]
/// [base_lg: u8]
/// ```
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    /// Flattened contents of the keys accumulated since the last boundary.
    keys: Vec<u8>,
    /// Start of each key within `keys`.
    starts: Vec<usize>,
    /// Filter data computed so far.
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    /// Create a builder for the given policy.
    pub fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        Self {
            policy,
            keys: Vec::new(),
            starts: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Note that the next data block begins at `block_offset`.
    ///
    /// Flushes the keys accumulated so far into one filter per 2KB range
    /// crossed since the previous call. Ranges containing no block start get
    /// an empty filter so the range-to-filter mapping stays dense.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = (block_offset / FILTER_BASE) as usize;
        assert!(filter_index >= self.filter_offsets.len());
        while self.filter_offsets.len() < filter_index {
            self.generate_filter();
        }
    }

    /// Register a key belonging to the block announced by `start_block`.
    pub fn add_key(&mut self, key: &[u8]) {
        self.starts.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    /// Flush remaining keys and return the serialized filter block.
    pub fn finish(&mut self) -> Bytes {
        if !self.starts.is_empty() {
            self.generate_filter();
        }

        let num_filters = self.filter_offsets.len() as u32;
        let mut block = std::mem::take(&mut self.result);
        for &offset in &self.filter_offsets {
            put_fixed32(&mut block, offset);
        }
        let filters_end = block.len() as u32 - num_filters * 4; // End of final filter
        put_fixed32(&mut block, filters_end);
        put_fixed32(&mut block, num_filters);
        block.push(FILTER_BASE_LG);
        Bytes::from(block)
    }

    fn generate_filter(&mut self) {
        let num_keys = self.starts.len();
        self.filter_offsets.push(self.result.len() as u32);
        if num_keys == 0 {
            // No keys since the last range boundary: empty filter
            return;
        }

        // Reconstruct the key list from the flattened form
        self.starts.push(self.keys.len()); // Sentinel simplifying slicing
        let keys: Vec<&[u8]> =
            (0..num_keys).map(|i| &self.keys[self.starts[i]..self.starts[i + 1]]).collect();

        let filter = self.policy.create_filter(&keys);
        self.result.extend_from_slice(&filter);

        self.keys.clear();
        self.starts.clear();
    }
}

/// Probes the filter block of an open table.
///
/// A malformed filter block never fails a lookup; it degrades to answering
/// "may match" for every key.
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Bytes,
    /// Byte position of the offset array.
    offsets_start: usize,
    /// Number of filters.
    num: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    /// Wrap the serialized filter block `data`.
    pub fn new(policy: Arc<dyn FilterPolicy>, data: Bytes) -> Self {
        let mut reader =
            Self { policy, data, offsets_start: 0, num: 0, base_lg: 0 };

        let len = reader.data.len();
        if len < 5 {
            return reader;
        }
        reader.base_lg = reader.data[len - 1];
        let num = decode_fixed32(&reader.data[len - 5..]) as usize;

        // The offset array holds num + 1 entries ahead of the count
        let Some(offsets_start) = (len - 5).checked_sub((num + 1) * 4) else {
            return reader;
        };
        reader.offsets_start = offsets_start;
        reader.num = num;
        reader
    }

    fn offset(&self, index: usize) -> usize {
        decode_fixed32(&self.data[self.offsets_start + index * 4..]) as usize
    }

    /// Whether `key` may be present in the data block starting at
    /// `block_offset`. False positives are allowed; false negatives are not.
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num {
            // Out of range or malformed block: treat as a potential match
            return true;
        }

        let start = self.offset(index);
        let limit = self.offset(index + 1);
        if start == limit {
            // Empty filters do not match any keys
            return false;
        }
        if start > limit || limit > self.offsets_start {
            // Inconsistent offsets: err on the side of matching
            return true;
        }
        self.policy.key_may_match(key, &self.data[start..limit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::BloomFilterPolicy;

    fn policy() -> Arc<dyn FilterPolicy> {
        Arc::new(BloomFilterPolicy::new(10))
    }

    #[test]
    fn test_empty_builder() {
        let mut builder = FilterBlockBuilder::new(policy());
        let block = builder.finish();

        // One end offset, a zero count, and the base byte
        assert_eq!(&block[..], &[0, 0, 0, 0, 0, 0, 0, 0, FILTER_BASE_LG]);

        let reader = FilterBlockReader::new(policy(), block);
        assert!(reader.key_may_match(0, b"foo"));
        assert!(reader.key_may_match(100_000, b"foo"));
    }

    #[test]
    fn test_single_chunk() {
        let mut builder = FilterBlockBuilder::new(policy());
        builder.start_block(100);
        builder.add_key(b"foo");
        builder.add_key(b"bar");
        builder.add_key(b"box");
        builder.start_block(200);
        builder.add_key(b"box");
        builder.start_block(300);
        builder.add_key(b"hello");
        let block = builder.finish();

        let reader = FilterBlockReader::new(policy(), block);
        assert!(reader.key_may_match(100, b"foo"));
        assert!(reader.key_may_match(100, b"bar"));
        assert!(reader.key_may_match(100, b"box"));
        assert!(reader.key_may_match(100, b"hello"));
        assert!(!reader.key_may_match(100, b"missing"));
        assert!(!reader.key_may_match(100, b"other"));
    }

    #[test]
    fn test_multi_chunk() {
        let mut builder = FilterBlockBuilder::new(policy());

        // First filter
        builder.start_block(0);
        builder.add_key(b"foo");
        builder.start_block(2000);
        builder.add_key(b"bar");

        // Second filter
        builder.start_block(3100);
        builder.add_key(b"box");

        // Two ranges with no block starts: empty filters
        builder.start_block(9000);
        builder.add_key(b"hello");

        let block = builder.finish();
        let reader = FilterBlockReader::new(policy(), block);

        // Check first filter
        assert!(reader.key_may_match(0, b"foo"));
        assert!(reader.key_may_match(2000, b"bar"));
        assert!(!reader.key_may_match(0, b"box"));
        assert!(!reader.key_may_match(0, b"hello"));

        // Check second filter
        assert!(reader.key_may_match(3100, b"box"));
        assert!(!reader.key_may_match(3100, b"foo"));

        // Check the empty in-between ranges match nothing
        assert!(!reader.key_may_match(4100, b"foo"));
        assert!(!reader.key_may_match(6200, b"box"));

        // Check last filter
        assert!(reader.key_may_match(9000, b"hello"));
        assert!(!reader.key_may_match(9000, b"foo"));
    }

    #[test]
    fn test_offsets_stay_dense() {
        let mut builder = FilterBlockBuilder::new(policy());
        builder.start_block(0);
        builder.add_key(b"a");
        // Jump many ranges forward
        builder.start_block(10 * FILTER_BASE);
        builder.add_key(b"z");
        let block = builder.finish();

        let reader = FilterBlockReader::new(policy(), block.clone());
        assert_eq!(reader.num, 11);
        assert!(reader.key_may_match(0, b"a"));
        for range in 1..10u64 {
            assert!(!reader.key_may_match(range * FILTER_BASE, b"a"));
        }
        assert!(reader.key_may_match(10 * FILTER_BASE, b"z"));
    }

    #[test]
    fn test_malformed_block_matches_everything() {
        let reader = FilterBlockReader::new(policy(), Bytes::from_static(&[1, 2, 3]));
        assert!(reader.key_may_match(0, b"anything"));

        // Count claims more offsets than the block holds
        let reader =
            FilterBlockReader::new(policy(), Bytes::from_static(&[255, 0, 0, 0, FILTER_BASE_LG]));
        assert!(reader.key_may_match(0, b"anything"));
    }
}
