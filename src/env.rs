//! File abstractions consumed by the table and log layers.
//!
//! The readers and writers in this crate never touch the filesystem
//! directly; they go through these traits so callers can substitute
//! in-memory files, counting wrappers, or fault injectors in tests.

use crate::error::Result;
use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A file supporting positioned reads, shareable between readers.
pub trait RandomAccessFile: Send + Sync {
    /// Read up to `n` bytes starting at `offset`.
    ///
    /// A result shorter than `n` means end of file was reached.
    fn read_at(&self, offset: u64, n: usize) -> Result<Bytes>;
}

/// An append-only file.
pub trait WritableFile {
    /// Append `data` at the current end of the file.
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Push buffered data to the operating system.
    fn flush(&mut self) -> Result<()>;

    /// Force written data to persistent storage.
    fn sync(&mut self) -> Result<()>;

    /// Flush and close the file.
    fn close(&mut self) -> Result<()>;
}

/// A file read sequentially from front to back.
pub trait SequentialFile {
    /// Read up to `n` bytes from the current position.
    ///
    /// A result shorter than `n` means end of file was reached.
    fn read(&mut self, n: usize) -> Result<Vec<u8>>;

    /// Skip `n` bytes forward.
    fn skip(&mut self, n: u64) -> Result<()>;
}

/// A [`RandomAccessFile`] backed by a [`std::fs::File`].
#[derive(Debug)]
pub struct FsRandomAccessFile {
    file: File,
}

impl FsRandomAccessFile {
    /// Open the file at `path` for positioned reads.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self { file: File::open(path)? })
    }

    /// Size of the underlying file in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

impl RandomAccessFile for FsRandomAccessFile {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, n: usize) -> Result<Bytes> {
        use std::os::unix::fs::FileExt;

        let mut buf = vec![0u8; n];
        let mut read = 0;
        while read < n {
            let got = self.file.read_at(&mut buf[read..], offset + read as u64)?;
            if got == 0 {
                break;
            }
            read += got;
        }
        buf.truncate(read);
        Ok(Bytes::from(buf))
    }

    #[cfg(not(unix))]
    fn read_at(&self, offset: u64, n: usize) -> Result<Bytes> {
        // Clone the descriptor so the shared handle keeps no cursor state.
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; n];
        let mut read = 0;
        while read < n {
            let got = file.read(&mut buf[read..])?;
            if got == 0 {
                break;
            }
            read += got;
        }
        buf.truncate(read);
        Ok(Bytes::from(buf))
    }
}

/// A buffered [`WritableFile`] backed by a [`std::fs::File`].
#[derive(Debug)]
pub struct FsWritableFile {
    writer: BufWriter<File>,
}

impl FsWritableFile {
    /// Create or truncate the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self { writer: BufWriter::new(file) })
    }

    /// Open the file at `path` in append mode, creating it if missing.
    ///
    /// Returns the file together with its current size, which a log writer
    /// needs to resume mid-block.
    pub fn append_to<P: AsRef<Path>>(path: P) -> Result<(Self, u64)> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();
        Ok((Self { writer: BufWriter::new(file) }, size))
    }
}

impl WritableFile for FsWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// A [`SequentialFile`] backed by a [`std::fs::File`].
#[derive(Debug)]
pub struct FsSequentialFile {
    file: File,
}

impl FsSequentialFile {
    /// Open the file at `path` for sequential reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self { file: File::open(path)? })
    }
}

impl SequentialFile for FsSequentialFile {
    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut read = 0;
        while read < n {
            let got = self.file.read(&mut buf[read..])?;
            if got == 0 {
                break;
            }
            read += got;
        }
        buf.truncate(read);
        Ok(buf)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        self.file.seek(SeekFrom::Current(n as i64))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_writable_then_random_access() {
        let tmp = NamedTempFile::new().unwrap();

        let mut w = FsWritableFile::create(tmp.path()).unwrap();
        w.append(b"hello ").unwrap();
        w.append(b"world").unwrap();
        w.sync().unwrap();

        let f = FsRandomAccessFile::open(tmp.path()).unwrap();
        assert_eq!(f.len().unwrap(), 11);
        assert_eq!(&f.read_at(0, 5).unwrap()[..], b"hello");
        assert_eq!(&f.read_at(6, 5).unwrap()[..], b"world");
        // Read past EOF is short, not an error
        assert_eq!(&f.read_at(6, 100).unwrap()[..], b"world");
        assert_eq!(f.read_at(100, 4).unwrap().len(), 0);
    }

    #[test]
    fn test_sequential_read_and_skip() {
        let tmp = NamedTempFile::new().unwrap();
        let mut w = FsWritableFile::create(tmp.path()).unwrap();
        w.append(b"0123456789").unwrap();
        w.sync().unwrap();

        let mut f = FsSequentialFile::open(tmp.path()).unwrap();
        assert_eq!(f.read(3).unwrap(), b"012");
        f.skip(4).unwrap();
        assert_eq!(f.read(10).unwrap(), b"789");
        assert_eq!(f.read(10).unwrap(), b"");
    }

    #[test]
    fn test_append_to_reports_size() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let (mut w, size) = FsWritableFile::append_to(tmp.path()).unwrap();
            assert_eq!(size, 0);
            w.append(b"abc").unwrap();
            w.close().unwrap();
        }
        let (_, size) = FsWritableFile::append_to(tmp.path()).unwrap();
        assert_eq!(size, 3);
    }
}
