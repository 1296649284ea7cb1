//! Online post-construction of pending secondary indexes.
//!
//! Walks the primary tree and synthesizes, for every live row, a
//! modification report that looks like a fresh insert, feeding it to the
//! per-index maintenance routine for each targeted index. Concurrent
//! writes keep maintaining the pending indexes themselves, so when the
//! walk finishes the indexes are coherent with the whole table and flip
//! to `Ready`.
//!
//! Each leaf is processed in its own write transaction; the sindex writes
//! for a row happen in the same transaction that read it. Interruption is
//! honored between leaves. Partial progress is fine: the procedure is
//! idempotent, since writing the same document at the same secondary key
//! twice yields the same state.

use std::collections::BTreeSet;

use rook_store::{Key, Store};
use rook_types::{Interruptor, SindexId};
use tracing::{debug, info};

use crate::error::TableError;
use crate::report::ModReport;
use crate::sindex::{mark_sindexes_ready, sindex_catalog, update_single_sindex_in};
use crate::table::Table;
use crate::value::DocRef;

/// Builds the given pending indexes from the table's current contents,
/// then marks them ready.
pub fn post_construct_sindexes(
    store: &Store,
    table: &Table,
    ids: &BTreeSet<SindexId>,
    interruptor: &Interruptor,
) -> Result<(), TableError> {
    let catalog = sindex_catalog(store)?;
    let mut targets = Vec::with_capacity(ids.len());
    for id in ids {
        let def = catalog.get(id).cloned().ok_or_else(|| {
            TableError::Corruption(format!("unknown secondary index {id}"))
        })?;
        targets.push(def);
    }
    if targets.is_empty() {
        return Ok(());
    }

    let mut rows = 0u64;
    let mut from = Key::min();

    loop {
        interruptor.check()?;

        let mut txn = store.begin();
        let Some(chunk) = txn.leaf_chunk(table.tree(), &from)? else {
            break;
        };

        for entry in &chunk.entries {
            let doc = DocRef::from_leaf(entry.value.clone())?.read_document(&mut txn)?;

            // As if the row had just been inserted.
            let mut report = ModReport::new(entry.key.clone());
            report.added = Some(doc);

            for def in &targets {
                update_single_sindex_in(&mut txn, def, &report)?;
            }
            rows += 1;
        }
        drop(txn);

        debug!(rows, "post-construction progressed past one leaf");
        match chunk.resume {
            Some(resume) => from = resume,
            None => break,
        }
    }

    mark_sindexes_ready(store, ids)?;
    info!(
        indexes = targets.len(),
        rows, "secondary index post-construction complete"
    );
    Ok(())
}

#[cfg(test)]
mod post_construct_tests {
    use super::*;
    use crate::point::point_set;
    use crate::report::ModReport;
    use crate::sindex::{
        SindexDef, SindexState, create_sindex, encode_secondary, sindex_catalog,
    };
    use crate::transform::MapExpr;
    use rook_store::TreeId;
    use rook_types::WriteStamp;
    use serde_json::json;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Store, Table) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        let table = Table::new(TreeId::new(1), "id");
        (dir, store, table)
    }

    fn put(store: &Store, table: &Table, doc: serde_json::Value) {
        let key = Key::from(doc["id"].as_str().unwrap());
        let mut report = ModReport::new(key.clone());
        point_set(store, table, &key, &doc, true, WriteStamp::new(1), &mut report).unwrap();
    }

    #[test]
    fn builds_index_from_existing_rows() {
        let (_dir, store, table) = setup();
        put(&store, &table, json!({"id": "1", "a": 10}));
        put(&store, &table, json!({"id": "2", "a": 10}));
        put(&store, &table, json!({"id": "3", "a": 20}));

        let def = SindexDef::new(
            SindexId::generate(),
            "by_a",
            TreeId::new(100),
            &MapExpr::Field("a".into()),
        );
        create_sindex(&store, &def).unwrap();

        post_construct_sindexes(
            &store,
            &table,
            &BTreeSet::from([def.id]),
            &Interruptor::new(),
        )
        .unwrap();

        // Every row is present under its composite key, mapped to the
        // full document.
        let mut txn = store.begin();
        for (value, pk) in [(json!(10), "1"), (json!(10), "2"), (json!(20), "3")] {
            let skey = encode_secondary(&value, &Key::from(pk)).unwrap();
            let entry = txn
                .lookup(def.tree, &skey)
                .unwrap()
                .unwrap_or_else(|| panic!("missing sindex entry for pk {pk}"));
            let doc = DocRef::from_leaf(entry.value)
                .unwrap()
                .read_document(&mut txn)
                .unwrap();
            assert_eq!(doc["id"], json!(pk));
        }
        drop(txn);

        let catalog = sindex_catalog(&store).unwrap();
        assert_eq!(catalog[&def.id].state, SindexState::Ready);
    }

    #[test]
    fn rerunning_is_idempotent() {
        let (_dir, store, table) = setup();
        put(&store, &table, json!({"id": "1", "a": 1}));
        put(&store, &table, json!({"id": "2", "a": 2}));

        let def = SindexDef::new(
            SindexId::generate(),
            "by_a",
            TreeId::new(100),
            &MapExpr::Field("a".into()),
        );
        create_sindex(&store, &def).unwrap();

        let ids = BTreeSet::from([def.id]);
        post_construct_sindexes(&store, &table, &ids, &Interruptor::new()).unwrap();
        post_construct_sindexes(&store, &table, &ids, &Interruptor::new()).unwrap();

        // Still exactly two entries.
        let mut txn = store.begin();
        let mut count = 0;
        let mut from = Key::min();
        loop {
            let Some(chunk) = txn.leaf_chunk(def.tree, &from).unwrap() else {
                break;
            };
            count += chunk.entries.len();
            match chunk.resume {
                Some(next) => from = next,
                None => break,
            }
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn unknown_index_is_corruption() {
        let (_dir, store, table) = setup();
        let err = post_construct_sindexes(
            &store,
            &table,
            &BTreeSet::from([SindexId::generate()]),
            &Interruptor::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TableError::Corruption(_)));
    }

    #[test]
    fn interruption_leaves_partial_progress() {
        let (_dir, store, table) = setup();
        put(&store, &table, json!({"id": "1", "a": 1}));

        let def = SindexDef::new(
            SindexId::generate(),
            "by_a",
            TreeId::new(100),
            &MapExpr::Field("a".into()),
        );
        create_sindex(&store, &def).unwrap();

        let interruptor = Interruptor::new();
        interruptor.trigger();

        let ids = BTreeSet::from([def.id]);
        let err =
            post_construct_sindexes(&store, &table, &ids, &interruptor).unwrap_err();
        assert!(matches!(err, TableError::Interrupted(_)));

        // Not ready yet; a re-run completes the job.
        let catalog = sindex_catalog(&store).unwrap();
        assert_eq!(catalog[&def.id].state, SindexState::Pending);

        post_construct_sindexes(&store, &table, &ids, &Interruptor::new()).unwrap();
        let catalog = sindex_catalog(&store).unwrap();
        assert_eq!(catalog[&def.id].state, SindexState::Ready);
    }
}
