//! Approximate key-distribution sampling.
//!
//! Derives a key → approximate-count histogram from the B-tree's
//! structure at a bounded depth. Higher layers use it to plan shard
//! boundaries; the counts are deliberately coarse.

use std::collections::BTreeMap;

use rook_store::{Key, Store};

use crate::error::TableError;
use crate::table::Table;

/// Response to a distribution read: an ordered key → count map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionResponse {
    pub key_counts: BTreeMap<Key, u64>,
}

/// Samples the key distribution starting at `left_key`, descending at
/// most `max_depth` internal levels for split keys.
///
/// `left_key` and every discovered split key land at a common bucket size
/// of `max(total / splits, 1)`, or the whole key count when the tree is
/// too shallow to offer splits.
pub fn distribution_get(
    store: &Store,
    table: &Table,
    left_key: &Key,
    max_depth: usize,
) -> Result<DistributionResponse, TableError> {
    let (total, splits) = store
        .begin()
        .key_distribution(table.tree(), max_depth)?;

    let keys_per_bucket = if splits.is_empty() {
        total
    } else {
        (total / splits.len() as u64).max(1)
    };

    let mut key_counts = BTreeMap::new();
    key_counts.insert(left_key.clone(), keys_per_bucket);
    for split in splits {
        key_counts.insert(split, keys_per_bucket);
    }

    Ok(DistributionResponse { key_counts })
}
