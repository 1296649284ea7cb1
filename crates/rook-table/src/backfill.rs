//! Replication backfill: an ordered stream of changes since a stamp.
//!
//! The backfill walks the primary tree leaf by leaf and tells a consumer
//! what changed since `since`: individual deletions where the leaf still
//! remembers them, whole-range refreshes where it no longer does (the
//! requested stamp predates the leaf's deletion horizon), and key/value
//! pairs with their recency stamps. The sindex catalogue is emitted once,
//! before any data.
//!
//! Emission order per leaf: the delete-range or the deletions first, then
//! the pairs — a consumer applying events in order converges on the
//! source's state. Interruption is honored at every chunk boundary, and
//! any consumer error aborts the backfill immediately.

use std::collections::BTreeMap;

use rook_store::{Key, KeyRange, Store};
use rook_types::{Interruptor, SindexId, WriteStamp};
use tracing::debug;

use crate::error::TableError;
use crate::sindex::{SindexDef, sindex_catalog};
use crate::table::Table;
use crate::value::DocRef;

/// One key/value item in a backfill stream.
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillItem {
    pub key: Key,
    pub doc: serde_json::Value,
    pub recency: WriteStamp,
}

/// Receiver of a backfill stream.
pub trait BackfillConsumer {
    /// Every key in `range` must be dropped before applying what follows.
    fn on_delete_range(&mut self, range: &KeyRange) -> Result<(), TableError>;

    /// One key was deleted at `recency`.
    fn on_deletion(&mut self, key: &Key, recency: WriteStamp) -> Result<(), TableError>;

    /// One live row.
    fn on_keyvalue(&mut self, item: BackfillItem) -> Result<(), TableError>;

    /// The sindex catalogue; emitted once, before the first data item.
    fn on_sindexes(
        &mut self,
        sindexes: &BTreeMap<SindexId, SindexDef>,
    ) -> Result<(), TableError>;
}

/// Streams every change in `range` since `since` to `consumer`.
pub fn backfill(
    store: &Store,
    table: &Table,
    range: &KeyRange,
    since: WriteStamp,
    consumer: &mut dyn BackfillConsumer,
    interruptor: &Interruptor,
) -> Result<(), TableError> {
    let catalog = sindex_catalog(store)?;
    consumer.on_sindexes(&catalog)?;

    let mut from = range.left.clone();
    let mut chunks = 0u64;

    loop {
        interruptor.check()?;

        // Pull one leaf's worth of state under the lock; talk to the
        // consumer outside it.
        let (deletions, pairs, horizon, resume) = {
            let mut txn = store.begin();
            let Some(chunk) = txn.leaf_chunk(table.tree(), &from)? else {
                break;
            };

            let deletions: Vec<(Key, WriteStamp)> = chunk
                .deletions
                .iter()
                .filter(|d| range.contains(&d.key))
                .map(|d| (d.key.clone(), d.stamp))
                .collect();

            let refresh = since < chunk.horizon;
            let mut pairs = Vec::new();
            for entry in &chunk.entries {
                if !range.contains(&entry.key) {
                    continue;
                }
                // Under a whole-range refresh every live pair is resent;
                // otherwise only those newer than the request stamp.
                if refresh || entry.recency > since {
                    let doc =
                        DocRef::from_leaf(entry.value.clone())?.read_document(&mut txn)?;
                    pairs.push(BackfillItem {
                        key: entry.key.clone(),
                        doc,
                        recency: entry.recency,
                    });
                }
            }
            (deletions, pairs, chunk.horizon, chunk.resume)
        };

        // The keys this chunk covered: [from, resume), clipped to the
        // requested range.
        let cover_right = match (&resume, &range.right) {
            (Some(r), Some(bound)) => Some(r.min(bound).clone()),
            (Some(r), None) => Some(r.clone()),
            (None, bound) => bound.clone(),
        };
        let cover = KeyRange::new(from.clone(), cover_right);
        debug_assert!(range.is_superset(&cover), "chunk escaped the backfill range");

        if since < horizon {
            // Deletions older than the buffer can remember may be missing:
            // refresh the whole covered range.
            consumer.on_delete_range(&cover)?;
        } else {
            for (key, recency) in &deletions {
                if *recency > since {
                    debug_assert!(range.contains(key));
                    consumer.on_deletion(key, *recency)?;
                }
            }
        }

        for item in pairs {
            debug_assert!(range.contains(&item.key));
            consumer.on_keyvalue(item)?;
        }

        chunks += 1;
        match resume {
            Some(next) if range.contains(&next) => from = next,
            _ => break,
        }
    }

    debug!(table = %table.tree(), %since, chunks, "backfill complete");
    Ok(())
}
