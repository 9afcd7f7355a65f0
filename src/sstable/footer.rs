//! SSTable footer implementation.
//!
//! The footer is a fixed-size (48 bytes) structure at the end of an SSTable
//! file that contains pointers to the index block and metaindex block.

use crate::error::{Error, Result};
use crate::sstable::MAGIC_NUMBER;
use crate::util::coding::{decode_fixed32, decode_varint64, put_fixed32, put_varint64};
use bytes::BufMut;

/// BlockHandle represents a pointer to a block in the SSTable file.
///
/// It contains the offset and size of the block, both varint64-encoded on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    /// Offset of the block in the file.
    pub offset: u64,
    /// Size of the block in bytes, excluding its trailer.
    pub size: u64,
}

impl BlockHandle {
    /// Maximum encoded length of a BlockHandle (two full varint64s).
    pub const MAX_ENCODED_LENGTH: usize = 10 + 10;

    /// Create a new BlockHandle.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Append the encoded handle to `buf`.
    pub fn encode_to(&self, buf: &mut impl BufMut) {
        put_varint64(buf, self.offset);
        put_varint64(buf, self.size);
    }

    /// Encode the handle into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MAX_ENCODED_LENGTH);
        self.encode_to(&mut buf);
        buf
    }

    /// Decode a handle from the front of `data`.
    ///
    /// Returns the handle and the number of bytes consumed; extra trailing
    /// data is permitted.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (offset, n0) = decode_varint64(data).map_err(|_| bad_handle())?;
        let (size, n1) = decode_varint64(&data[n0..]).map_err(|_| bad_handle())?;
        Ok((Self { offset, size }, n0 + n1))
    }
}

fn bad_handle() -> Error {
    Error::corruption("bad block handle")
}

/// Footer is the last 48 bytes of an SSTable file.
///
/// Format:
/// ```text
/// [metaindex_handle: varint64 x2]
/// [index_handle: varint64 x2]
/// [padding to 40 bytes]
/// [magic: fixed32 x2]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    /// Handle to the metaindex block.
    pub metaindex_handle: BlockHandle,
    /// Handle to the index block.
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Encoded length of a footer, fixed.
    pub const ENCODED_LENGTH: usize = 2 * BlockHandle::MAX_ENCODED_LENGTH + 8;

    /// Create a new Footer.
    pub fn new(metaindex_handle: BlockHandle, index_handle: BlockHandle) -> Self {
        Self { metaindex_handle, index_handle }
    }

    /// Encode the footer to its 48-byte wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LENGTH);
        self.metaindex_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        buf.resize(2 * BlockHandle::MAX_ENCODED_LENGTH, 0); // Padding

        put_fixed32(&mut buf, (MAGIC_NUMBER & 0xffff_ffff) as u32);
        put_fixed32(&mut buf, (MAGIC_NUMBER >> 32) as u32);

        debug_assert_eq!(buf.len(), Self::ENCODED_LENGTH);
        buf
    }

    /// Decode a footer from its 48-byte wire form.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::ENCODED_LENGTH {
            return Err(Error::corruption("file is too short to be an sstable"));
        }

        let magic_lo = decode_fixed32(&data[Self::ENCODED_LENGTH - 8..]);
        let magic_hi = decode_fixed32(&data[Self::ENCODED_LENGTH - 4..]);
        let magic = ((magic_hi as u64) << 32) | magic_lo as u64;
        if magic != MAGIC_NUMBER {
            return Err(Error::corruption("not an sstable (bad magic number)"));
        }

        let (metaindex_handle, n) = BlockHandle::decode(data)?;
        let (index_handle, _) = BlockHandle::decode(&data[n..])?;

        Ok(Self { metaindex_handle, index_handle })
    }
}
