//! SSTable builder implementation.
//!
//! Builds an SSTable file from a sequence of sorted key-value pairs.

use crate::config::{CompressionType, Options};
use crate::env::{FsWritableFile, WritableFile};
use crate::error::{Error, Result};
use crate::sstable::block::BlockBuilder;
use crate::sstable::filter_block::FilterBlockBuilder;
use crate::sstable::footer::{BlockHandle, Footer};
use crate::sstable::BLOCK_TRAILER_SIZE;
use crate::util::crc;
use bytes::Bytes;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

/// SSTableBuilder builds an SSTable file.
///
/// Keys must be added in strictly increasing comparator order. Data blocks
/// are flushed as they fill; [`finish`](SSTableBuilder::finish) writes the
/// filter block, metaindex block, index block, and footer.
///
/// Usage:
/// ```no_run
/// use siltdb::sstable::SSTableBuilder;
/// use siltdb::Options;
///
/// let mut builder = SSTableBuilder::create("table.sst", Options::default()).unwrap();
/// builder.add(b"key1", b"value1").unwrap();
/// builder.add(b"key2", b"value2").unwrap();
/// builder.finish().unwrap();
/// ```
pub struct SSTableBuilder<W: WritableFile = FsWritableFile> {
    options: Options,
    file: W,
    /// File offset the next block will land at.
    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter_block: Option<FilterBlockBuilder>,
    last_key: Vec<u8>,
    num_entries: u64,
    closed: bool,
    /// We do not emit the index entry for a block until we have seen the
    /// first key of the next block, so the index key can be a short
    /// separator between the two. True only while `data_block` is empty.
    pending_index_entry: bool,
    pending_handle: BlockHandle,
}

impl SSTableBuilder<FsWritableFile> {
    /// Create a builder writing to a new file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let file = FsWritableFile::create(path)?;
        Self::new(options, file)
    }
}

impl<W: WritableFile> SSTableBuilder<W> {
    /// Create a builder writing to `file`, which must be empty.
    pub fn new(options: Options, file: W) -> Result<Self> {
        options.validate()?;

        let data_block =
            BlockBuilder::new(options.block_restart_interval, Arc::clone(&options.comparator));
        // Index entries are seeked individually; prefix compression across
        // them would only slow the binary search down.
        let index_block = BlockBuilder::new(1, Arc::clone(&options.comparator));
        let mut filter_block =
            options.filter_policy.as_ref().map(|policy| FilterBlockBuilder::new(Arc::clone(policy)));
        if let Some(fb) = &mut filter_block {
            fb.start_block(0);
        }

        Ok(Self {
            options,
            file,
            offset: 0,
            data_block,
            index_block,
            filter_block,
            last_key: Vec::new(),
            num_entries: 0,
            closed: false,
            pending_index_entry: false,
            pending_handle: BlockHandle::new(0, 0),
        })
    }

    /// Add a key-value pair to the table.
    ///
    /// Keys must be added in strictly increasing comparator order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_argument("add to a finished table"));
        }
        if self.num_entries > 0
            && self.options.comparator.compare(key, &self.last_key) != Ordering::Greater
        {
            return Err(Error::invalid_argument("keys must be added in sorted order"));
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            self.options.comparator.find_shortest_separator(&mut self.last_key, key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }

        if let Some(fb) = &mut self.filter_block {
            fb.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush the in-progress data block to the file.
    fn flush(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);

        let raw = self.data_block.finish();
        self.data_block.reset();
        self.pending_handle = self.write_block(raw, self.options.compression)?;
        self.pending_index_entry = true;
        self.file.flush()?;

        if let Some(fb) = &mut self.filter_block {
            fb.start_block(self.offset);
        }
        Ok(())
    }

    /// Compress (if configured and worthwhile) and write one block.
    fn write_block(&mut self, raw: Bytes, compression: CompressionType) -> Result<BlockHandle> {
        let (contents, compression) = match compression {
            CompressionType::None => (raw, CompressionType::None),
            #[cfg(feature = "snappy")]
            CompressionType::Snappy => {
                match snap::raw::Encoder::new().compress_vec(&raw) {
                    // Keep the compressed form only when it saves at least
                    // 1/8th, otherwise store the block uncompressed.
                    Ok(compressed) if compressed.len() < raw.len() - raw.len() / 8 => {
                        (Bytes::from(compressed), CompressionType::Snappy)
                    }
                    _ => (raw, CompressionType::None),
                }
            }
        };
        self.write_raw_block(&contents, compression)
    }

    /// Write block contents followed by the compression/CRC trailer.
    fn write_raw_block(
        &mut self,
        contents: &[u8],
        compression: CompressionType,
    ) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        self.file.append(contents)?;

        let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
        trailer[0] = compression as u8;
        let checksum = crc::extend(crc::value(contents), &trailer[..1]);
        trailer[1..].copy_from_slice(&crc::mask(checksum).to_le_bytes());
        self.file.append(&trailer)?;

        self.offset += contents.len() as u64 + BLOCK_TRAILER_SIZE as u64;
        Ok(handle)
    }

    /// Finish building the table.
    ///
    /// Writes the filter block, metaindex block, index block, and footer,
    /// then flushes the file. Returns the final file size.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;
        self.closed = true;

        // Write filter block
        let filter_contents = self.filter_block.as_mut().map(|fb| fb.finish());
        let filter_handle = match filter_contents {
            Some(contents) => Some(self.write_raw_block(&contents, CompressionType::None)?),
            None => None,
        };

        // Write metaindex block
        let mut metaindex_block = BlockBuilder::new(
            self.options.block_restart_interval,
            Arc::clone(&self.options.comparator),
        );
        if let Some(handle) = filter_handle {
            let policy = self.options.filter_policy.as_ref().unwrap();
            let key = format!("filter.{}", policy.name());
            let mut handle_encoding = Vec::new();
            handle.encode_to(&mut handle_encoding);
            metaindex_block.add(key.as_bytes(), &handle_encoding);
        }
        let metaindex_contents = metaindex_block.finish();
        let metaindex_handle =
            self.write_block(metaindex_contents, self.options.compression)?;

        // Write index block
        if self.pending_index_entry {
            self.options.comparator.find_short_successor(&mut self.last_key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }
        let index_contents = self.index_block.finish();
        let index_handle = self.write_block(index_contents, self.options.compression)?;

        // Write footer
        let footer = Footer::new(metaindex_handle, index_handle);
        self.file.append(&footer.encode())?;
        self.offset += Footer::ENCODED_LENGTH as u64;

        self.file.close()?;
        Ok(self.offset)
    }

    /// Abandon the table without writing a footer.
    ///
    /// The partially written file must not be opened; the caller is
    /// responsible for deleting it.
    pub fn abandon(mut self) -> Result<()> {
        self.closed = true;
        self.file.close()
    }

    /// Number of entries added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Size of the file generated so far. Accurate after `finish`.
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}
