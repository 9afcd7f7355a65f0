//! Filter policies for skipping data-block reads.
//!
//! A filter policy turns a set of keys into a compact bitmap that can later
//! answer "might this key be in the set?". False positives cost one wasted
//! block read; false negatives are a bug.

pub mod bloom;

pub use bloom::BloomFilterPolicy;

/// Policy for creating and probing per-block filters.
pub trait FilterPolicy: Send + Sync {
    /// The name of this policy, recorded in the table's metaindex.
    ///
    /// Changing the filter format requires changing the name, otherwise old
    /// filters would be probed with the new scheme.
    fn name(&self) -> &'static str;

    /// Build a filter over `keys` and return its serialized bytes.
    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8>;

    /// Whether `key` may be in the set `filter` was created from.
    ///
    /// Must return true for every key passed to
    /// [`create_filter`](FilterPolicy::create_filter); may return true for
    /// other keys.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}
