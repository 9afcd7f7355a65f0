// Fault injection tests: corrupted table files must fail loudly on the
// data path and degrade gracefully on the filter path

use siltdb::filter::BloomFilterPolicy;
use siltdb::sstable::{SSTableBuilder, SSTableReader, FOOTER_SIZE};
use siltdb::{CompressionType, Options, ReadOptions};
use std::sync::Arc;
use tempfile::NamedTempFile;

fn build_small_table(options: Options) -> (NamedTempFile, Vec<(Vec<u8>, Vec<u8>)>) {
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..50)
        .map(|i| (format!("key{:04}", i).into_bytes(), format!("value{:04}", i).into_bytes()))
        .collect();
    let file = NamedTempFile::new().unwrap();
    let mut builder = SSTableBuilder::create(file.path(), options).unwrap();
    for (key, value) in &entries {
        builder.add(key, value).unwrap();
    }
    builder.finish().unwrap();
    (file, entries)
}

/// Flipping any single byte of a data block or its trailer makes the next
/// checked read of that block fail with corruption.
#[test]
fn test_any_data_byte_flip_is_detected() {
    let options = Options::default().compression(CompressionType::None);
    let (file, _) = build_small_table(options.clone());
    let clean = std::fs::read(file.path()).unwrap();

    // Everything before the metaindex block is data blocks + trailers
    let table = SSTableReader::open_path(file.path(), options.clone()).unwrap();
    let data_end = table.approximate_offset_of(b"\xff\xff\xff\xff") as usize;
    drop(table);
    assert!(data_end > 0 && data_end < clean.len());

    let read_options = ReadOptions::default().verify_checksums(true);
    for position in 0..data_end {
        let mut data = clean.clone();
        data[position] ^= 0x01;
        std::fs::write(file.path(), &data).unwrap();

        // A full scan reads every data block, so the damaged one is hit
        let table = SSTableReader::open_path(file.path(), options.clone()).unwrap();
        let mut iter = table.iter(read_options);
        iter.seek_to_first();
        while iter.valid() {
            iter.next();
        }
        let err = iter.status().expect_err(&format!("flip at {} went undetected", position));
        assert!(err.is_corruption(), "flip at {}: unexpected error {}", position, err);
    }
}

/// Without checksum verification a trailer flip goes unnoticed, with it
/// the same read fails: verification is what property 4 hinges on.
#[test]
fn test_verification_is_opt_in_per_read() {
    let options = Options::default().compression(CompressionType::None);
    let (file, _) = build_small_table(options.clone());

    // Flip one payload byte inside the first data block
    let mut data = std::fs::read(file.path()).unwrap();
    data[20] ^= 0x01;
    std::fs::write(file.path(), &data).unwrap();

    let table = SSTableReader::open_path(file.path(), options).unwrap();
    assert!(table
        .get(&ReadOptions::default().verify_checksums(true), b"key0025")
        .unwrap_err()
        .is_corruption());
}

/// A destroyed filter block downgrades the table to filterless reads
/// instead of failing the open.
#[test]
fn test_damaged_filter_block_is_nonfatal() {
    let options = Options::default()
        .compression(CompressionType::None)
        .filter_policy(Arc::new(BloomFilterPolicy::new(10)));
    let (file, entries) = build_small_table(options.clone());

    // The filter block and its trailer end right where the metaindex
    // begins; find that boundary through a clean open and wreck the bytes
    // leading up to it.
    let clean_table = SSTableReader::open_path(file.path(), options.clone()).unwrap();
    assert!(clean_table.has_filter());
    let metaindex_start = clean_table.approximate_offset_of(b"\xff\xff\xff\xff") as usize;
    drop(clean_table);

    let mut data = std::fs::read(file.path()).unwrap();
    for byte in data[..metaindex_start].iter_mut().rev().take(30) {
        *byte ^= 0xff;
    }
    std::fs::write(file.path(), &data).unwrap();

    // paranoid_checks forces the filter read to see the damage
    let table =
        SSTableReader::open_path(file.path(), options.clone().paranoid_checks(true)).unwrap();
    assert!(!table.has_filter());

    // Reads still work, they just pay the block reads a filter would skip
    for (key, value) in &entries {
        assert_eq!(
            table.get(&ReadOptions::default(), key).unwrap().as_deref(),
            Some(value.as_slice())
        );
    }
}

/// paranoid_checks turns index-block damage into an open failure.
#[test]
fn test_paranoid_open_rejects_damaged_index() {
    let options = Options::default().compression(CompressionType::None);
    let (file, _) = build_small_table(options.clone());

    // The index block lies just before the footer; flip a byte inside it
    let mut data = std::fs::read(file.path()).unwrap();
    let index_byte = data.len() - FOOTER_SIZE - 10;
    data[index_byte] ^= 0x01;
    std::fs::write(file.path(), &data).unwrap();

    let err =
        SSTableReader::open_path(file.path(), options.clone().paranoid_checks(true)).unwrap_err();
    assert!(err.is_corruption());
}

/// A file of zeros and an empty file are rejected, not misparsed.
#[test]
fn test_garbage_files_rejected() {
    let file = NamedTempFile::new().unwrap();

    std::fs::write(file.path(), []).unwrap();
    assert!(SSTableReader::open_path(file.path(), Options::default()).is_err());

    std::fs::write(file.path(), vec![0u8; 4096]).unwrap();
    let err = SSTableReader::open_path(file.path(), Options::default()).unwrap_err();
    assert!(err.to_string().contains("bad magic number"));
}
