//! # siltdb - Persistent substrate for an ordered key-value store
//!
//! siltdb provides the two on-disk formats at the bottom of an LSM-tree
//! storage engine: the immutable Sorted String Table (SSTable) and the
//! Write-Ahead Log (WAL) record codec.
//!
//! ## Architecture
//!
//! - **SSTable**: prefix-compressed data blocks with restart-point binary
//!   search, an index block of short separator keys, an optional Bloom
//!   filter block partitioned by file offset, and a fixed 48-byte footer
//! - **Block Cache**: shared LRU cache of uncompressed data blocks keyed
//!   by (table, offset)
//! - **WAL**: logical records fragmented across 32KB physical blocks with
//!   per-fragment checksums; the reader reassembles, detects corruption,
//!   and resynchronizes past it
//!
//! Everything runs on the caller's thread. A finished table is immutable
//! and can be shared across threads freely; the block cache is the only
//! internally synchronized component.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use siltdb::sstable::{SSTableBuilder, SSTableReader};
//! use siltdb::{Options, ReadOptions};
//!
//! # fn main() -> Result<(), siltdb::Error> {
//! // Build a table from sorted keys
//! let mut builder = SSTableBuilder::create("data.sst", Options::default())?;
//! builder.add(b"key1", b"value1")?;
//! builder.add(b"key2", b"value2")?;
//! builder.finish()?;
//!
//! // Point lookups and scans
//! let table = SSTableReader::open_path("data.sst", Options::default())?;
//! if let Some(value) = table.get(&ReadOptions::default(), b"key1")? {
//!     println!("Found: {:?}", value);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod comparator;
pub mod config;
pub mod env;
pub mod error;
pub mod filter;
pub mod sstable;
pub mod util;
pub mod wal;

pub use comparator::{BytewiseComparator, Comparator};
pub use config::{CompressionType, Options, ReadOptions};
pub use error::{Error, Result};
