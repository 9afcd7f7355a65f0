//! Block format implementation for SSTable.
//!
//! A block contains multiple key-value entries and uses restart points
//! for efficient binary search and prefix compression.

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::util::coding::{decode_fixed32, decode_varint32, put_fixed32, put_varint32};
use bytes::{BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use std::sync::Arc;

/// Block stores key-value pairs with prefix compression.
///
/// Format:
/// ```text
/// [Entry 1]
/// [Entry 2]
/// ...
/// [Entry N]
/// [Restart Point 1: fixed32]
/// ...
/// [Restart Point M: fixed32]
/// [Num Restarts: fixed32]
/// ```
///
/// Each entry format:
/// ```text
/// [shared_key_len: varint32]    // Length of prefix shared with previous key
/// [unshared_key_len: varint32]  // Length of unshared key suffix
/// [value_len: varint32]         // Length of value
/// [key_delta: bytes]            // Key suffix
/// [value: bytes]                // Value data
/// ```
///
/// `shared_key_len == 0` marks a restart point: the entry stores its full
/// key and the restart array records its offset for binary search.
#[derive(Debug, Clone)]
pub struct Block {
    data: Bytes,
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Create a new Block from raw data.
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("block too small"));
        }

        let num_restarts = decode_fixed32(&data[data.len() - 4..]);

        // The restart array and its length must fit inside the block.
        let max_restarts = ((data.len() - 4) / 4) as u32;
        if num_restarts == 0 || num_restarts > max_restarts {
            return Err(Error::corruption("bad restart count in block"));
        }

        let restart_offset = data.len() - 4 - num_restarts as usize * 4;
        Ok(Self { data, restart_offset, num_restarts })
    }

    /// Get the number of restart points.
    pub fn num_restarts(&self) -> u32 {
        self.num_restarts
    }

    /// Size of the block in bytes, including the restart trailer.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Get a restart point by index.
    fn restart_point(&self, index: u32) -> u32 {
        debug_assert!(index < self.num_restarts);
        let offset = self.restart_offset + (index as usize * 4);
        decode_fixed32(&self.data[offset..offset + 4])
    }

    /// Get the raw data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// BlockBuilder builds a block with prefix compression.
pub struct BlockBuilder {
    buffer: BytesMut,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
    block_restart_interval: usize,
    comparator: Arc<dyn Comparator>,
    finished: bool,
}

impl BlockBuilder {
    /// Create a new BlockBuilder.
    pub fn new(block_restart_interval: usize, comparator: Arc<dyn Comparator>) -> Self {
        assert!(block_restart_interval >= 1);

        Self {
            buffer: BytesMut::new(),
            restarts: vec![0], // First restart point is at offset 0
            counter: 0,
            last_key: Vec::new(),
            block_restart_interval,
            comparator,
            finished: false,
        }
    }

    /// Add a key-value pair to the block.
    ///
    /// Keys must be added in strictly increasing comparator order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        assert!(!self.finished, "add after finish without reset");
        assert!(self.counter <= self.block_restart_interval);
        assert!(
            self.buffer.is_empty() || self.comparator.compare(key, &self.last_key) == Ordering::Greater,
            "keys must be added in sorted order"
        );

        let mut shared = 0;
        if self.counter < self.block_restart_interval {
            // See how much sharing to do with the previous key
            let min_len = self.last_key.len().min(key.len());
            while shared < min_len && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            // Restart compression
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }

        let non_shared = key.len() - shared;

        // Entry header: <shared><non_shared><value_len>
        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);

        // Key delta followed by the value
        self.buffer.put_slice(&key[shared..]);
        self.buffer.put_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.counter += 1;
    }

    /// Finish building and return the block contents.
    ///
    /// The builder must be [`reset`](BlockBuilder::reset) before reuse.
    pub fn finish(&mut self) -> Bytes {
        for &restart in &self.restarts {
            put_fixed32(&mut self.buffer, restart);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        self.buffer.split().freeze()
    }

    /// Clear all state, ready to build a new block.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.finished = false;
    }

    /// Exact size of the block if `finish` were called now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len()             // Entry data
            + self.restarts.len() * 4 // Restart array
            + 4                       // Restart array length
    }

    /// Check if no entries have been added since the last reset.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Decoded entry header: (shared, non_shared, value_len, header_len).
fn decode_entry(data: &[u8]) -> Result<(usize, usize, usize, usize)> {
    let (shared, n0) = decode_varint32(data)?;
    let (non_shared, n1) = decode_varint32(&data[n0..])?;
    let (value_len, n2) = decode_varint32(&data[n0 + n1..])?;

    let header_len = n0 + n1 + n2;
    let shared = shared as usize;
    let non_shared = non_shared as usize;
    let value_len = value_len as usize;

    if header_len + non_shared + value_len > data.len() {
        return Err(Error::corruption("block entry overruns block"));
    }
    Ok((shared, non_shared, value_len, header_len))
}

/// Iterator over entries in a block.
///
/// Once a malformed entry is encountered the iterator becomes permanently
/// invalid and [`status`](BlockIterator::status) reports the corruption.
pub struct BlockIterator {
    block: Arc<Block>,
    comparator: Arc<dyn Comparator>,
    /// Offset of the current entry within the block data.
    current: usize,
    /// Index of the restart region containing the current entry.
    restart_index: u32,
    key: Vec<u8>,
    value_range: (usize, usize),
    status: Option<Error>,
}

impl BlockIterator {
    /// Create an iterator over `block`, initially positioned before the
    /// first entry.
    pub fn new(block: Arc<Block>, comparator: Arc<dyn Comparator>) -> Self {
        let restart_offset = block.restart_offset;
        Self {
            block,
            comparator,
            current: restart_offset,
            restart_index: 0,
            key: Vec::new(),
            value_range: (restart_offset, restart_offset),
            status: None,
        }
    }

    /// Check if the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        self.status.is_none() && self.current < self.block.restart_offset
    }

    /// Ok unless a malformed entry has permanently invalidated the iterator.
    pub fn status(&self) -> Result<()> {
        match &self.status {
            None => Ok(()),
            Some(e) => Err(e.clone()),
        }
    }

    /// Get the current key.
    pub fn key(&self) -> &[u8] {
        assert!(self.valid(), "iterator not valid");
        &self.key
    }

    /// Get the current value.
    pub fn value(&self) -> &[u8] {
        assert!(self.valid(), "iterator not valid");
        &self.block.data[self.value_range.0..self.value_range.1]
    }

    /// Position at the first entry.
    pub fn seek_to_first(&mut self) {
        if self.status.is_some() {
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    /// Position at the last entry.
    pub fn seek_to_last(&mut self) {
        if self.status.is_some() {
            return;
        }
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_entry() && self.next_entry_offset() < self.block.restart_offset {
            // Keep skipping until we hit the tail of the block
        }
    }

    /// Position at the first entry whose key is >= `target`.
    pub fn seek(&mut self, target: &[u8]) {
        if self.status.is_some() {
            return;
        }

        // Binary search over restart points for the last restart whose key
        // is < target.
        let mut left = 0u32;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let region_offset = self.block.restart_point(mid) as usize;

            let entries = &self.block.data[..self.block.restart_offset];
            if region_offset >= entries.len() {
                self.corruption_error(Error::corruption("restart offset out of range"));
                return;
            }
            let (shared, non_shared, _, header_len) = match decode_entry(&entries[region_offset..])
            {
                Ok(e) => e,
                Err(e) => {
                    self.corruption_error(e);
                    return;
                }
            };
            if shared != 0 {
                // Restart entries must store the full key
                self.corruption_error(Error::corruption("restart entry has shared prefix"));
                return;
            }

            let key_start = region_offset + header_len;
            let mid_key = &entries[key_start..key_start + non_shared];
            if self.comparator.compare(mid_key, target) == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        // Linear scan forward from the chosen restart point
        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_entry() {
                return;
            }
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    /// Advance to the next entry. Returns whether the iterator is valid.
    pub fn next(&mut self) -> bool {
        if !self.valid() {
            return false;
        }
        self.parse_next_entry()
    }

    /// Step back to the previous entry. Returns whether the iterator is valid.
    ///
    /// Backward steps re-scan the current restart region from its head, so
    /// each one costs O(block_restart_interval) entry decodes.
    pub fn prev(&mut self) -> bool {
        if !self.valid() {
            return false;
        }
        let original = self.current;

        // Find the restart region that ends before the current entry
        while self.block.restart_point(self.restart_index) as usize >= original {
            if self.restart_index == 0 {
                // No entries before the first one
                self.current = self.block.restart_offset;
                self.restart_index = self.block.num_restarts;
                return false;
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        loop {
            if !self.parse_next_entry() {
                return false;
            }
            if self.next_entry_offset() >= original {
                return true;
            }
        }
    }

    /// Offset just past the current entry.
    fn next_entry_offset(&self) -> usize {
        self.value_range.1
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        // parse_next_entry picks up from the end of the (empty) value range
        let offset = self.block.restart_point(index) as usize;
        self.current = offset;
        self.value_range = (offset, offset);
    }

    /// Decode the entry at the current position. Returns false at the end
    /// of the block or on corruption.
    fn parse_next_entry(&mut self) -> bool {
        self.current = self.next_entry_offset();
        if self.current >= self.block.restart_offset {
            // No more entries; mark invalid without error
            self.current = self.block.restart_offset;
            self.restart_index = self.block.num_restarts;
            return false;
        }

        let entries = &self.block.data[..self.block.restart_offset];
        let (shared, non_shared, value_len, header_len) =
            match decode_entry(&entries[self.current..]) {
                Ok(e) => e,
                Err(e) => {
                    self.corruption_error(e);
                    return false;
                }
            };

        if shared > self.key.len() {
            self.corruption_error(Error::corruption("shared prefix exceeds previous key"));
            return false;
        }

        let delta_start = self.current + header_len;
        self.key.truncate(shared);
        self.key.extend_from_slice(&entries[delta_start..delta_start + non_shared]);
        self.value_range = (delta_start + non_shared, delta_start + non_shared + value_len);

        // Track which restart region we are in
        while self.restart_index + 1 < self.block.num_restarts
            && (self.block.restart_point(self.restart_index + 1) as usize) < self.current
        {
            self.restart_index += 1;
        }
        true
    }

    /// Enter the sticky invalid state.
    fn corruption_error(&mut self, error: Error) {
        self.current = self.block.restart_offset;
        self.restart_index = self.block.num_restarts;
        self.key.clear();
        self.value_range = (self.current, self.current);
        self.status = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    fn comparator() -> Arc<dyn Comparator> {
        Arc::new(BytewiseComparator)
    }

    fn build_block(interval: usize, entries: &[(&[u8], &[u8])]) -> Arc<Block> {
        let mut builder = BlockBuilder::new(interval, comparator());
        for (key, value) in entries {
            builder.add(key, value);
        }
        Arc::new(Block::new(builder.finish()).unwrap())
    }

    #[test]
    fn test_block_builder_empty() {
        let mut builder = BlockBuilder::new(16, comparator());
        assert!(builder.is_empty());
        assert_eq!(builder.current_size_estimate(), 8);

        let block = Arc::new(Block::new(builder.finish()).unwrap());
        let mut iter = BlockIterator::new(Arc::clone(&block), comparator());
        iter.seek_to_first();
        assert!(!iter.valid());
    }

    #[test]
    fn test_restart_layout() {
        // With interval 2 the third entry starts a new restart region
        let mut builder = BlockBuilder::new(2, comparator());
        builder.add(b"a", b"1");
        builder.add(b"ab", b"2");
        builder.add(b"abc", b"3");
        builder.add(b"abd", b"4");
        let data = builder.finish();

        // Entry bytes: restart "a", compressed "ab", restart "abc",
        // compressed "abd" (shared prefix "ab")
        #[rustfmt::skip]
        let expected_entries: &[u8] = &[
            0, 1, 1, b'a', b'1',
            1, 1, 1, b'b', b'2',
            0, 3, 1, b'a', b'b', b'c', b'3',
            2, 1, 1, b'd', b'4',
        ];
        assert_eq!(&data[..expected_entries.len()], expected_entries);

        // Trailer: restarts [0, 10], num_restarts 2
        let trailer = &data[expected_entries.len()..];
        assert_eq!(trailer, &[0, 0, 0, 0, 10, 0, 0, 0, 2, 0, 0, 0]);

        let block = Block::new(data).unwrap();
        assert_eq!(block.num_restarts(), 2);
    }

    #[test]
    fn test_current_size_estimate_is_exact() {
        let mut builder = BlockBuilder::new(3, comparator());
        let mut last = 0;
        for i in 0..20 {
            let key = format!("key{:04}", i);
            builder.add(key.as_bytes(), b"value");
            let estimate = builder.current_size_estimate();
            assert!(estimate > last);
            last = estimate;
        }
        let estimate = builder.current_size_estimate();
        assert_eq!(builder.finish().len(), estimate);
    }

    #[test]
    fn test_builder_reset() {
        let mut builder = BlockBuilder::new(16, comparator());
        builder.add(b"x", b"1");
        builder.finish();
        builder.reset();

        assert!(builder.is_empty());
        builder.add(b"a", b"2");
        let block = Arc::new(Block::new(builder.finish()).unwrap());
        let mut iter = BlockIterator::new(Arc::clone(&block), comparator());
        iter.seek_to_first();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"a");
    }

    #[test]
    fn test_iterate_forward() {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..100)
            .map(|i| (format!("key{:04}", i).into_bytes(), format!("v{}", i).into_bytes()))
            .collect();
        let refs: Vec<(&[u8], &[u8])> =
            entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
        let block = build_block(4, &refs);

        let mut iter = BlockIterator::new(Arc::clone(&block), comparator());
        iter.seek_to_first();
        for (key, value) in &entries {
            assert!(iter.valid());
            assert_eq!(iter.key(), key.as_slice());
            assert_eq!(iter.value(), value.as_slice());
            iter.next();
        }
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_iterate_backward() {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..50)
            .map(|i| (format!("key{:04}", i).into_bytes(), format!("v{}", i).into_bytes()))
            .collect();
        let refs: Vec<(&[u8], &[u8])> =
            entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
        let block = build_block(4, &refs);

        let mut iter = BlockIterator::new(Arc::clone(&block), comparator());
        iter.seek_to_last();
        for (key, value) in entries.iter().rev() {
            assert!(iter.valid());
            assert_eq!(iter.key(), key.as_slice());
            assert_eq!(iter.value(), value.as_slice());
            iter.prev();
        }
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_seek() {
        let block = build_block(
            2,
            &[(b"apple", b"1"), (b"banana", b"2"), (b"cherry", b"3"), (b"fig", b"4")],
        );
        let mut iter = BlockIterator::new(Arc::clone(&block), comparator());

        // Exact hit
        iter.seek(b"banana");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"banana");

        // Between keys: least key >= target
        iter.seek(b"avocado");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"banana");

        // Before all keys
        iter.seek(b"");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"apple");

        // Past all keys
        iter.seek(b"zebra");
        assert!(!iter.valid());
    }

    #[test]
    fn test_seek_all_positions() {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..60)
            .map(|i| (format!("key{:04}", i * 2).into_bytes(), b"v".to_vec()))
            .collect();
        let refs: Vec<(&[u8], &[u8])> =
            entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
        let block = build_block(5, &refs);
        let mut iter = BlockIterator::new(Arc::clone(&block), comparator());

        for i in 0..60 {
            // Seeking to an existing key finds it
            let exact = format!("key{:04}", i * 2);
            iter.seek(exact.as_bytes());
            assert!(iter.valid());
            assert_eq!(iter.key(), exact.as_bytes());

            // Seeking between keys finds the successor
            let between = format!("key{:04}", i * 2 + 1);
            iter.seek(between.as_bytes());
            if i == 59 {
                assert!(!iter.valid());
            } else {
                assert!(iter.valid());
                assert_eq!(iter.key(), format!("key{:04}", (i + 1) * 2).as_bytes());
            }
        }
    }

    #[test]
    fn test_mixed_next_prev() {
        let block = build_block(2, &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3"), (b"d", b"4")]);
        let mut iter = BlockIterator::new(Arc::clone(&block), comparator());

        iter.seek(b"c");
        assert_eq!(iter.key(), b"c");
        assert!(iter.prev());
        assert_eq!(iter.key(), b"b");
        assert!(iter.prev());
        assert_eq!(iter.key(), b"a");
        assert!(!iter.prev());

        iter.seek_to_first();
        assert!(iter.next());
        assert_eq!(iter.key(), b"b");
    }

    #[test]
    fn test_corrupt_entry_is_sticky() {
        let mut builder = BlockBuilder::new(16, comparator());
        builder.add(b"aaa", b"1");
        builder.add(b"bbb", b"2");
        let data = builder.finish();

        // Inflate the first entry's unshared length far past the block
        let mut raw = data.to_vec();
        raw[1] = 200;
        let block = Arc::new(Block::new(Bytes::from(raw)).unwrap());

        let mut iter = BlockIterator::new(Arc::clone(&block), comparator());
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(iter.status().unwrap_err().is_corruption());

        // Still invalid after further positioning attempts
        iter.seek(b"aaa");
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
        assert!(iter.status().unwrap_err().is_corruption());
    }

    #[test]
    fn test_corrupt_restart_count() {
        // Restart count larger than the block can hold
        let data = Bytes::from_static(&[0xff, 0xff, 0xff, 0x7f]);
        assert!(Block::new(data).is_err());

        assert!(Block::new(Bytes::from_static(&[0, 0])).is_err());

        // Zero restarts never occurs in a built block
        assert!(Block::new(Bytes::from_static(&[0, 0, 0, 0])).is_err());
    }

    #[test]
    #[should_panic(expected = "keys must be added in sorted order")]
    fn test_block_builder_unsorted_keys() {
        let mut builder = BlockBuilder::new(16, comparator());
        builder.add(b"key2", b"value2");
        builder.add(b"key1", b"value1");
    }
}
