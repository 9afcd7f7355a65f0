//! WAL reader implementation for recovery.

use super::{RecordType, BLOCK_SIZE, HEADER_SIZE};
use crate::env::{FsSequentialFile, SequentialFile};
use crate::util::coding::decode_fixed32;
use crate::util::crc;
use bytes::{Buf, Bytes};
use std::path::Path;

/// Sink for corruption reports encountered during a log scan.
///
/// The reader never aborts on corruption: it reports the number of bytes
/// dropped and resumes at the next recognizable fragment boundary.
pub trait Reporter {
    /// Some bytes were dropped; `bytes` is the approximate count.
    fn corruption(&mut self, bytes: usize, reason: &str);
}

/// Outcome of reading one physical fragment.
enum PhysicalRecord {
    /// A well-formed fragment of the given type.
    Fragment(RecordType, Bytes),
    /// A fragment that failed validation and was dropped.
    Bad,
    /// A fragment type byte outside the known range.
    Unknown(u8, Bytes),
    /// End of file.
    Eof,
}

/// WAL reader reassembling logical records from physical fragments.
///
/// When opened at a non-zero `initial_offset` the reader skips to the
/// containing block and discards fragments until the first record boundary,
/// so replay can start mid-file without spurious corruption reports.
pub struct WALReader<R: SequentialFile = FsSequentialFile> {
    file: R,
    reporter: Option<Box<dyn Reporter>>,
    checksum: bool,
    /// Unconsumed tail of the current 32KB read.
    buffer: Bytes,
    eof: bool,
    /// Offset of the fragment that began the last record returned.
    last_record_offset: u64,
    /// File offset just past the bytes currently in `buffer`.
    end_of_buffer_offset: u64,
    initial_offset: u64,
    /// Dropping fragments until the next record boundary.
    resyncing: bool,
}

impl WALReader<FsSequentialFile> {
    /// Open the log at `path` for a full scan with checksums on.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        Ok(Self::new(FsSequentialFile::open(path)?, None, true, 0))
    }
}

impl<R: SequentialFile> WALReader<R> {
    /// Create a reader over `file`.
    ///
    /// Corruption found at or after `initial_offset` is passed to
    /// `reporter`; anything before it is dropped silently. Checksum
    /// verification can be disabled for logs written by trusted local
    /// processes.
    pub fn new(
        file: R,
        reporter: Option<Box<dyn Reporter>>,
        checksum: bool,
        initial_offset: u64,
    ) -> Self {
        Self {
            file,
            reporter,
            checksum,
            buffer: Bytes::new(),
            eof: false,
            last_record_offset: 0,
            end_of_buffer_offset: 0,
            initial_offset,
            resyncing: initial_offset > 0,
        }
    }

    /// Read the next logical record, reassembling fragments.
    ///
    /// Returns `None` at end of file. Corruption goes to the reporter and
    /// the scan continues; a logical record left unfinished by a crashed
    /// writer is silently ignored.
    pub fn read_record(&mut self) -> Option<Vec<u8>> {
        if self.last_record_offset < self.initial_offset && !self.skip_to_initial_block() {
            return None;
        }

        let mut scratch: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;
        // Offset of the First fragment of the record being assembled
        let mut prospective_record_offset = 0u64;

        loop {
            let physical_record = self.read_physical_record();

            if self.resyncing {
                match physical_record {
                    PhysicalRecord::Fragment(RecordType::Middle, _) => continue,
                    PhysicalRecord::Fragment(RecordType::Last, _) => {
                        self.resyncing = false;
                        continue;
                    }
                    _ => self.resyncing = false,
                }
            }

            match physical_record {
                PhysicalRecord::Fragment(RecordType::Full, fragment) => {
                    if in_fragmented_record && !scratch.is_empty() {
                        self.report_corruption(scratch.len(), "partial record without end(1)");
                    }
                    self.last_record_offset = self.fragment_offset(fragment.len());
                    return Some(fragment.to_vec());
                }
                PhysicalRecord::Fragment(RecordType::First, fragment) => {
                    if in_fragmented_record && !scratch.is_empty() {
                        self.report_corruption(scratch.len(), "partial record without end(2)");
                    }
                    prospective_record_offset = self.fragment_offset(fragment.len());
                    scratch.clear();
                    scratch.extend_from_slice(&fragment);
                    in_fragmented_record = true;
                }
                PhysicalRecord::Fragment(RecordType::Middle, fragment) => {
                    if !in_fragmented_record {
                        self.report_corruption(
                            fragment.len(),
                            "missing start of fragmented record(1)",
                        );
                    } else {
                        scratch.extend_from_slice(&fragment);
                    }
                }
                PhysicalRecord::Fragment(RecordType::Last, fragment) => {
                    if !in_fragmented_record {
                        self.report_corruption(
                            fragment.len(),
                            "missing start of fragmented record(2)",
                        );
                    } else {
                        scratch.extend_from_slice(&fragment);
                        self.last_record_offset = prospective_record_offset;
                        return Some(scratch);
                    }
                }
                PhysicalRecord::Fragment(RecordType::Zero, fragment) => {
                    // Nonzero-length Zero fragments are not preallocation
                    let dropped =
                        fragment.len() + if in_fragmented_record { scratch.len() } else { 0 };
                    self.report_corruption(dropped, "unknown record type 0");
                    in_fragmented_record = false;
                    scratch.clear();
                }
                PhysicalRecord::Unknown(type_byte, fragment) => {
                    let dropped =
                        fragment.len() + if in_fragmented_record { scratch.len() } else { 0 };
                    self.report_corruption(dropped, &format!("unknown record type {}", type_byte));
                    in_fragmented_record = false;
                    scratch.clear();
                }
                PhysicalRecord::Bad => {
                    if in_fragmented_record {
                        self.report_corruption(scratch.len(), "error in middle of record");
                        in_fragmented_record = false;
                        scratch.clear();
                    }
                }
                PhysicalRecord::Eof => {
                    // A writer dying mid-record leaves a partial logical
                    // record; ignore it rather than reporting corruption.
                    return None;
                }
            }
        }
    }

    /// File offset of the fragment most recently removed from the buffer.
    fn fragment_offset(&self, fragment_len: usize) -> u64 {
        self.end_of_buffer_offset
            - self.buffer.len() as u64
            - HEADER_SIZE as u64
            - fragment_len as u64
    }

    /// Offset of the First/Full fragment of the last record returned by
    /// [`read_record`](WALReader::read_record).
    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    /// Collect every remaining record.
    ///
    /// Corruption is reported (or logged when no reporter is set) and the
    /// scan continues behind it.
    pub fn recover_all(&mut self) -> Vec<Vec<u8>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record() {
            records.push(record);
        }
        records
    }

    /// Position the underlying file at the block containing
    /// `initial_offset`.
    fn skip_to_initial_block(&mut self) -> bool {
        let offset_in_block = (self.initial_offset % BLOCK_SIZE as u64) as usize;
        let mut block_start_location = self.initial_offset - offset_in_block as u64;

        // An offset inside the zero-padded block tail belongs to the next block
        if offset_in_block > BLOCK_SIZE - 6 {
            block_start_location += BLOCK_SIZE as u64;
        }

        self.end_of_buffer_offset = block_start_location;

        if block_start_location > 0 {
            if let Err(e) = self.file.skip(block_start_location) {
                self.report_drop(block_start_location as usize, &e.to_string());
                return false;
            }
        }
        true
    }

    /// Read and validate one physical fragment, refilling the block buffer
    /// as needed.
    fn read_physical_record(&mut self) -> PhysicalRecord {
        loop {
            if self.buffer.len() < HEADER_SIZE {
                if !self.eof {
                    // Last read was a full block; what remains is trailer padding
                    self.buffer = Bytes::new();
                    match self.file.read(BLOCK_SIZE) {
                        Ok(data) => {
                            self.end_of_buffer_offset += data.len() as u64;
                            if data.len() < BLOCK_SIZE {
                                self.eof = true;
                            }
                            self.buffer = Bytes::from(data);
                        }
                        Err(e) => {
                            self.report_drop(BLOCK_SIZE, &e.to_string());
                            self.eof = true;
                            return PhysicalRecord::Eof;
                        }
                    }
                    continue;
                } else {
                    // A truncated header at EOF means the writer crashed
                    // mid-header; treat it as a clean end of file.
                    self.buffer = Bytes::new();
                    return PhysicalRecord::Eof;
                }
            }

            // Parse the header
            let header = &self.buffer[..HEADER_SIZE];
            let length = header[4] as usize | ((header[5] as usize) << 8);
            let type_byte = header[6];

            if HEADER_SIZE + length > self.buffer.len() {
                let drop_size = self.buffer.len();
                self.buffer = Bytes::new();
                if !self.eof {
                    self.report_corruption(drop_size, "bad record length");
                    return PhysicalRecord::Bad;
                }
                // The writer died before finishing the payload; not a corruption
                return PhysicalRecord::Eof;
            }

            if type_byte == RecordType::Zero as u8 && length == 0 {
                // Zero-length Zero records come from file preallocation;
                // skip the rest of the buffer without reporting a drop.
                self.buffer = Bytes::new();
                return PhysicalRecord::Bad;
            }

            if self.checksum {
                let expected = crc::unmask(decode_fixed32(header));
                // CRC covers the type byte and the payload
                let actual = crc::value(&self.buffer[HEADER_SIZE - 1..HEADER_SIZE + length]);
                if actual != expected {
                    // Drop the whole buffer: the length field itself may be
                    // corrupt, and trusting it could resynchronize on bytes
                    // that merely look like a valid fragment.
                    let drop_size = self.buffer.len();
                    self.buffer = Bytes::new();
                    self.report_corruption(drop_size, "checksum mismatch");
                    return PhysicalRecord::Bad;
                }
            }

            let fragment = self.buffer.slice(HEADER_SIZE..HEADER_SIZE + length);
            self.buffer.advance(HEADER_SIZE + length);

            // Skip physical records that started before initial_offset
            if self.fragment_offset(length) < self.initial_offset {
                return PhysicalRecord::Bad;
            }

            return match RecordType::from_u8(type_byte) {
                Some(record_type) => PhysicalRecord::Fragment(record_type, fragment),
                None => PhysicalRecord::Unknown(type_byte, fragment),
            };
        }
    }

    fn report_corruption(&mut self, bytes: usize, reason: &str) {
        self.report_drop(bytes, reason);
    }

    fn report_drop(&mut self, bytes: usize, reason: &str) {
        // Drops entirely before initial_offset are expected, not reported
        if self
            .end_of_buffer_offset
            .wrapping_sub(self.buffer.len() as u64)
            .wrapping_sub(bytes as u64)
            < self.initial_offset
        {
            return;
        }
        match &mut self.reporter {
            Some(reporter) => reporter.corruption(bytes, reason),
            None => log::warn!("log: dropping {} bytes: {}", bytes, reason),
        }
    }
}
