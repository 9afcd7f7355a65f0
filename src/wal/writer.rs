//! WAL writer implementation.

use super::{RecordType, BLOCK_SIZE, HEADER_SIZE, MAX_RECORD_TYPE};
use crate::env::{FsWritableFile, WritableFile};
use crate::error::Result;
use crate::util::crc;
use std::path::Path;

/// When the writer pushes buffered bytes to the operating system.
///
/// Flushing is not a durability guarantee (that requires
/// [`sync`](WALWriter::sync)); it bounds how much a reader opening the
/// file concurrently can lag behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Flush after every physical fragment. A record fragmented across N
    /// blocks costs N flushes.
    EveryFragment,
    /// Flush once per logical record, after its Full or Last fragment.
    OnRecordBoundary,
}

/// WAL writer appending logical records to a log file.
///
/// Records larger than the space left in the current 32KB block are
/// fragmented; an empty record still produces one zero-length Full
/// fragment.
pub struct WALWriter<W: WritableFile = FsWritableFile> {
    dest: W,
    /// Current offset within the current block.
    block_offset: usize,
    flush_policy: FlushPolicy,
    /// Precomputed CRC of each type byte, extended with the payload on
    /// every emit.
    type_crc: [u32; MAX_RECORD_TYPE as usize + 1],
}

impl WALWriter<FsWritableFile> {
    /// Create a writer over a new log file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(FsWritableFile::create(path)?))
    }

    /// Open the log file at `path` for appending.
    pub fn append_to<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (file, size) = FsWritableFile::append_to(path)?;
        Ok(Self::with_offset(file, size))
    }
}

impl<W: WritableFile> WALWriter<W> {
    /// Create a writer over an empty destination file.
    pub fn new(dest: W) -> Self {
        Self::with_offset(dest, 0)
    }

    /// Create a writer over a destination file that already holds
    /// `dest_length` bytes of log data.
    pub fn with_offset(dest: W, dest_length: u64) -> Self {
        let mut type_crc = [0u32; MAX_RECORD_TYPE as usize + 1];
        for (value, slot) in type_crc.iter_mut().enumerate() {
            *slot = crc::value(&[value as u8]);
        }

        Self {
            dest,
            block_offset: (dest_length % BLOCK_SIZE as u64) as usize,
            flush_policy: FlushPolicy::EveryFragment,
            type_crc,
        }
    }

    /// Set the flush policy. Default: [`FlushPolicy::EveryFragment`].
    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    /// Append one logical record, fragmenting it across blocks as needed.
    pub fn add_record(&mut self, record: &[u8]) -> Result<()> {
        let mut left = record;
        let mut begin = true;

        // Emit at least one fragment even for an empty record.
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;

            if leftover < HEADER_SIZE {
                // Not enough room for a header; pad out the block
                if leftover > 0 {
                    self.dest.append(&[0u8; HEADER_SIZE - 1][..leftover])?;
                }
                self.block_offset = 0;
            }

            // Invariant: we never leave < HEADER_SIZE bytes in a block.
            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = left.len().min(avail);

            let end = fragment_length == left.len();
            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical_record(record_type, &left[..fragment_length])?;
            left = &left[fragment_length..];
            begin = false;

            if left.is_empty() {
                break;
            }
        }

        if self.flush_policy == FlushPolicy::OnRecordBoundary {
            self.dest.flush()?;
        }
        Ok(())
    }

    /// Force all appended records to persistent storage.
    pub fn sync(&mut self) -> Result<()> {
        self.dest.sync()
    }

    /// Close the writer, flushing buffered data.
    pub fn close(mut self) -> Result<()> {
        self.dest.close()
    }

    fn emit_physical_record(&mut self, record_type: RecordType, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= 0xffff); // Length must fit in two bytes
        debug_assert!(self.block_offset + HEADER_SIZE + data.len() <= BLOCK_SIZE);

        let mut header = [0u8; HEADER_SIZE];
        header[4] = (data.len() & 0xff) as u8;
        header[5] = (data.len() >> 8) as u8;
        header[6] = record_type as u8;

        // CRC covers the type byte and the payload
        let checksum = crc::extend(self.type_crc[record_type as usize], data);
        header[..4].copy_from_slice(&crc::mask(checksum).to_le_bytes());

        self.dest.append(&header)?;
        self.dest.append(data)?;
        if self.flush_policy == FlushPolicy::EveryFragment {
            self.dest.flush()?;
        }

        self.block_offset += HEADER_SIZE + data.len();
        Ok(())
    }
}
