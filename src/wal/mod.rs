//! Write-Ahead Log (WAL) record codec.
//!
//! The log is a sequence of 32KB physical blocks. A logical record is
//! stored as one or more fragments, each entirely inside a block, with a
//! 7-byte header carrying a masked CRC32C, the payload length, and the
//! fragment type. Large records span blocks as First/Middle*/Last chains;
//! block tails too small for a header are zero-padded.
//!
//! ## Fragment Format
//!
//! ```text
//! [crc32c: fixed32, masked, over type + payload]
//! [length: u16 little-endian]
//! [type: u8]
//! [payload: length bytes]
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use siltdb::wal::{WALReader, WALWriter};
//!
//! # fn main() -> Result<(), siltdb::Error> {
//! let mut writer = WALWriter::create("data.wal")?;
//! writer.add_record(b"key1:value1")?;
//! writer.add_record(b"key2:value2")?;
//! writer.sync()?;
//!
//! let mut reader = WALReader::open("data.wal")?;
//! while let Some(record) = reader.read_record() {
//!     println!("Recovered: {:?}", record);
//! }
//! # Ok(())
//! # }
//! ```

pub mod reader;
pub mod writer;

pub use reader::{Reporter, WALReader};
pub use writer::{FlushPolicy, WALWriter};

/// Size of a physical log block (32KB).
pub const BLOCK_SIZE: usize = 32768;

/// Size of the fragment header: checksum (4) + length (2) + type (1).
pub const HEADER_SIZE: usize = 7;

/// Largest type value that can appear in a fragment header.
pub const MAX_RECORD_TYPE: u8 = RecordType::Last as u8;

/// Fragment types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Reserved for preallocated files; never written by the writer.
    Zero = 0,
    /// Complete logical record in a single fragment.
    Full = 1,
    /// First fragment of a multi-block record.
    First = 2,
    /// Middle fragment of a multi-block record.
    Middle = 3,
    /// Last fragment of a multi-block record.
    Last = 4,
}

impl RecordType {
    /// Convert from the header byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }
}
