//! Low-level encoding and checksum helpers shared by the table and log formats.

pub mod coding;
pub mod crc;
