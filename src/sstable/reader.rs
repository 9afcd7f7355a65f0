//! SSTable reader implementation.
//!
//! Reads data from an SSTable file with cache-mediated block access, a
//! Bloom-filter-accelerated point lookup path, and a two-level iterator.

use crate::cache::CacheKey;
use crate::config::{CompressionType, Options, ReadOptions};
use crate::env::{FsRandomAccessFile, RandomAccessFile};
use crate::error::{Error, Result};
use crate::filter::FilterPolicy;
use crate::sstable::block::{Block, BlockIterator};
use crate::sstable::filter_block::FilterBlockReader;
use crate::sstable::footer::{BlockHandle, Footer};
use crate::sstable::{BLOCK_TRAILER_SIZE, FOOTER_SIZE};
use crate::util::coding::decode_fixed32;
use crate::util::crc;
use bytes::Bytes;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

/// Read one block and verify its trailer.
///
/// `handle.size` excludes the 5-byte trailer; the checksum covers the block
/// contents plus the compression byte. Returns the uncompressed contents.
pub(crate) fn read_block(
    file: &dyn RandomAccessFile,
    handle: &BlockHandle,
    verify_checksums: bool,
) -> Result<Bytes> {
    let n = handle.size as usize;
    let raw = file.read_at(handle.offset, n + BLOCK_TRAILER_SIZE)?;
    if raw.len() != n + BLOCK_TRAILER_SIZE {
        return Err(Error::corruption("truncated block read"));
    }

    if verify_checksums {
        let expected = crc::unmask(decode_fixed32(&raw[n + 1..]));
        let actual = crc::extend(crc::value(&raw[..n]), &raw[n..n + 1]);
        if actual != expected {
            return Err(Error::corruption("block checksum mismatch"));
        }
    }

    match CompressionType::from_u8(raw[n]) {
        Some(CompressionType::None) => Ok(raw.slice(..n)),
        #[cfg(feature = "snappy")]
        Some(CompressionType::Snappy) => {
            let decompressed = snap::raw::Decoder::new()
                .decompress_vec(&raw[..n])
                .map_err(|_| Error::corruption("corrupted compressed block contents"))?;
            Ok(Bytes::from(decompressed))
        }
        None => Err(Error::corruption("bad block type")),
    }
}

/// SSTableReader provides read access to a finished table file.
///
/// The reader's state is immutable after `open`, so it can be shared across
/// threads without synchronization; the optional block cache is internally
/// synchronized.
///
/// Usage:
/// ```no_run
/// use siltdb::sstable::SSTableReader;
/// use siltdb::{Options, ReadOptions};
///
/// let table = SSTableReader::open_path("table.sst", Options::default()).unwrap();
/// if let Some(value) = table.get(&ReadOptions::default(), b"key1").unwrap() {
///     println!("Found: {:?}", value);
/// }
/// ```
pub struct SSTableReader {
    options: Options,
    file: Arc<dyn RandomAccessFile>,
    /// Distinguishes this table's blocks inside the shared cache.
    cache_id: u64,
    filter: Option<FilterBlockReader>,
    /// Kept for `approximate_offset_of`: the metaindex sits just before the
    /// footer, so its offset is a conservative end-of-data bound.
    metaindex_handle: BlockHandle,
    index_block: Arc<Block>,
}

impl SSTableReader {
    /// Open a table from `file`, whose total length is `size` bytes.
    ///
    /// Reads the footer and index block eagerly. If a filter policy is
    /// configured the filter block is read too; failures there degrade the
    /// table to filterless operation instead of failing the open.
    pub fn open(options: Options, file: Arc<dyn RandomAccessFile>, size: u64) -> Result<Self> {
        options.validate()?;
        if size < FOOTER_SIZE as u64 {
            return Err(Error::corruption("file is too short to be an sstable"));
        }

        let footer_input = file.read_at(size - FOOTER_SIZE as u64, FOOTER_SIZE)?;
        let footer = Footer::decode(&footer_input)?;

        let index_contents =
            read_block(file.as_ref(), &footer.index_handle, options.paranoid_checks)?;
        let index_block = Arc::new(Block::new(index_contents)?);

        let cache_id = match &options.block_cache {
            Some(cache) => cache.new_id(),
            None => 0,
        };

        let mut table = Self {
            options,
            file,
            cache_id,
            filter: None,
            metaindex_handle: footer.metaindex_handle,
            index_block,
        };
        table.read_meta();
        Ok(table)
    }

    /// Open the table file at `path`.
    pub fn open_path<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let file = FsRandomAccessFile::open(path)?;
        let size = file.len()?;
        Self::open(options, Arc::new(file), size)
    }

    /// Locate the filter block through the metaindex.
    ///
    /// Failures are swallowed: a damaged filter loses performance, never
    /// correctness.
    fn read_meta(&mut self) {
        let Some(policy) = self.options.filter_policy.clone() else {
            return;
        };

        let contents = match read_block(
            self.file.as_ref(),
            &self.metaindex_handle,
            self.options.paranoid_checks,
        ) {
            Ok(contents) => contents,
            Err(e) => {
                log::warn!("metaindex block unreadable, table opens without filter: {}", e);
                return;
            }
        };
        let meta = match Block::new(contents) {
            Ok(block) => Arc::new(block),
            Err(e) => {
                log::warn!("metaindex block malformed, table opens without filter: {}", e);
                return;
            }
        };

        let key = format!("filter.{}", policy.name());
        let mut iter = BlockIterator::new(meta, Arc::clone(&self.options.comparator));
        iter.seek(key.as_bytes());
        if iter.valid() && iter.key() == key.as_bytes() {
            self.read_filter(iter.value(), policy);
        }
    }

    fn read_filter(&mut self, handle_value: &[u8], policy: Arc<dyn FilterPolicy>) {
        let Ok((handle, _)) = BlockHandle::decode(handle_value) else {
            return;
        };
        match read_block(self.file.as_ref(), &handle, self.options.paranoid_checks) {
            Ok(contents) => {
                self.filter = Some(FilterBlockReader::new(policy, contents));
            }
            Err(e) => {
                log::warn!("filter block unreadable, table opens without filter: {}", e);
            }
        }
    }

    /// Whether a filter block was successfully loaded at open.
    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Number of data blocks in the table.
    pub fn num_data_blocks(&self) -> usize {
        let mut iter = BlockIterator::new(Arc::clone(&self.index_block), Arc::clone(&self.options.comparator));
        let mut count = 0;
        iter.seek_to_first();
        while iter.valid() {
            count += 1;
            iter.next();
        }
        count
    }

    /// Convert an index entry value (an encoded handle) into an iterator
    /// over the corresponding data block, going through the cache when one
    /// is configured.
    fn block_reader(&self, options: &ReadOptions, index_value: &[u8]) -> Result<BlockIterator> {
        // Extra bytes after the handle are tolerated so the index value
        // encoding can grow.
        let (handle, _) = BlockHandle::decode(index_value)?;

        let block = match &self.options.block_cache {
            Some(cache) => {
                let cache_key = CacheKey::new(self.cache_id, handle.offset);
                match cache.lookup(&cache_key) {
                    Some(block) => block,
                    None => {
                        let contents =
                            read_block(self.file.as_ref(), &handle, options.verify_checksums)?;
                        let block = Arc::new(Block::new(contents)?);
                        if options.fill_cache {
                            cache.insert(cache_key, Arc::clone(&block), block.size())
                        } else {
                            block
                        }
                    }
                }
            }
            None => {
                let contents = read_block(self.file.as_ref(), &handle, options.verify_checksums)?;
                Arc::new(Block::new(contents)?)
            }
        };

        Ok(BlockIterator::new(block, Arc::clone(&self.options.comparator)))
    }

    /// Look up `key` and hand the entry found at or after it to `handler`.
    ///
    /// The handler is not invoked when the key lands past the end of the
    /// table or the filter rules the candidate block out. Finding nothing
    /// is not an error.
    pub fn internal_get<F>(&self, options: &ReadOptions, key: &[u8], mut handler: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let mut index_iter = BlockIterator::new(Arc::clone(&self.index_block), Arc::clone(&self.options.comparator));
        index_iter.seek(key);

        if index_iter.valid() {
            let filtered_out = match (&self.filter, BlockHandle::decode(index_iter.value())) {
                (Some(filter), Ok((handle, _))) => !filter.key_may_match(handle.offset, key),
                _ => false,
            };

            if !filtered_out {
                let mut block_iter = self.block_reader(options, index_iter.value())?;
                block_iter.seek(key);
                if block_iter.valid() {
                    handler(block_iter.key(), block_iter.value());
                }
                block_iter.status()?;
            }
        }
        index_iter.status()
    }

    /// Get the value stored under exactly `key`, if any.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut result = None;
        let comparator = Arc::clone(&self.options.comparator);
        self.internal_get(options, key, |found_key, value| {
            if comparator.compare(found_key, key) == Ordering::Equal {
                result = Some(value.to_vec());
            }
        })?;
        Ok(result)
    }

    /// Approximate file offset where the data for `key` begins.
    ///
    /// For keys past the last key of the table this returns the metaindex
    /// offset, which is near the end of the file and therefore a safe upper
    /// bound.
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        let mut index_iter = BlockIterator::new(Arc::clone(&self.index_block), Arc::clone(&self.options.comparator));
        index_iter.seek(key);
        if index_iter.valid() {
            if let Ok((handle, _)) = BlockHandle::decode(index_iter.value()) {
                return handle.offset;
            }
        }
        self.metaindex_handle.offset
    }

    /// Create an iterator over the whole table.
    pub fn iter(&self, options: ReadOptions) -> TableIterator<'_> {
        TableIterator::new(self, options)
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("cache_id", &self.cache_id)
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

/// Two-level iterator over a table.
///
/// The outer level walks the index block; the inner level is the data-block
/// iterator for the current index position, constructed lazily and replaced
/// when the outer level moves. At most one data block is held at a time,
/// and holding it pins its cache entry.
pub struct TableIterator<'a> {
    table: &'a SSTableReader,
    options: ReadOptions,
    index_iter: BlockIterator,
    data_iter: Option<BlockIterator>,
    /// Handle bytes `data_iter` was opened from, to avoid reopening the
    /// same block after an outer no-op.
    data_block_handle: Vec<u8>,
    status: Option<Error>,
}

impl<'a> TableIterator<'a> {
    fn new(table: &'a SSTableReader, options: ReadOptions) -> Self {
        let index_iter = BlockIterator::new(Arc::clone(&table.index_block), Arc::clone(&table.options.comparator));
        Self { table, options, index_iter, data_iter: None, data_block_handle: Vec::new(), status: None }
    }

    /// Check if the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        self.data_iter.as_ref().map(|it| it.valid()).unwrap_or(false)
    }

    /// Get the current key.
    pub fn key(&self) -> &[u8] {
        self.data_iter.as_ref().expect("iterator not valid").key()
    }

    /// Get the current value.
    pub fn value(&self) -> &[u8] {
        self.data_iter.as_ref().expect("iterator not valid").value()
    }

    /// The first error encountered by this iterator or either of its
    /// levels, if any.
    pub fn status(&self) -> Result<()> {
        if let Some(e) = &self.status {
            return Err(e.clone());
        }
        self.index_iter.status()?;
        match &self.data_iter {
            Some(it) => it.status(),
            None => Ok(()),
        }
    }

    /// Position at the first entry of the table.
    pub fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(it) = &mut self.data_iter {
            it.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    /// Position at the last entry of the table.
    pub fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(it) = &mut self.data_iter {
            it.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    /// Position at the first entry with key >= `target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(it) = &mut self.data_iter {
            it.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    /// Advance to the next entry. Returns whether the iterator is valid.
    pub fn next(&mut self) -> bool {
        if let Some(it) = &mut self.data_iter {
            it.next();
        }
        self.skip_empty_data_blocks_forward();
        self.valid()
    }

    /// Step back to the previous entry. Returns whether the iterator is
    /// valid.
    pub fn prev(&mut self) -> bool {
        if let Some(it) = &mut self.data_iter {
            it.prev();
        }
        self.skip_empty_data_blocks_backward();
        self.valid()
    }

    /// Open the data block for the current index position, unless it is
    /// already open. Dropping the previous iterator releases its pin.
    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.data_iter = None;
            return;
        }

        let handle = self.index_iter.value();
        if self.data_iter.is_some() && self.data_block_handle == handle {
            return;
        }

        let handle = handle.to_vec();
        match self.table.block_reader(&self.options, &handle) {
            Ok(iter) => {
                self.data_iter = Some(iter);
                self.data_block_handle = handle;
            }
            Err(e) => {
                if self.status.is_none() {
                    self.status = Some(e);
                }
                self.data_iter = None;
            }
        }
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while self.data_iter.as_ref().map(|it| it.valid()) != Some(true) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(it) = &mut self.data_iter {
                it.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while self.data_iter.as_ref().map(|it| it.valid()) != Some(true) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(it) = &mut self.data_iter {
                it.seek_to_last();
            }
        }
    }
}
