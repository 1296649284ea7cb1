//! Integration tests for the document layer.
//!
//! Exercises whole write paths: point ops and replaces feeding secondary
//! index maintenance, post-construction against live tables, report
//! replay, and persistence across reopen.

use std::collections::BTreeSet;

use rook_store::{Key, KeyRange, Store, TreeId};
use rook_types::{Interruptor, SindexId, WriteStamp};
use serde_json::{Value, json};
use tempfile::tempdir;

use crate::{
    DocRef, MapExpr, ModReport, PointWriteResult, ScanRequest, SindexDef, Table,
    create_sindex, insert_transform, point_delete, point_get, point_set,
    post_construct_sindexes, replace, rget, update_sindexes,
};

fn setup() -> (tempfile::TempDir, Store, Table) {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().join("t.db")).unwrap();
    let table = Table::new(TreeId::new(1), "id");
    (dir, store, table)
}

fn stamp(s: u64) -> WriteStamp {
    WriteStamp::new(s)
}

/// Writes a document and fans its report out to the given sindexes.
fn write_row(
    store: &Store,
    table: &Table,
    doc: Value,
    stamp_v: u64,
    sindexes: &[SindexDef],
) {
    let key = Key::from(doc["id"].as_str().unwrap());
    let mut report = ModReport::new(key.clone());
    point_set(store, table, &key, &doc, true, stamp(stamp_v), &mut report).unwrap();
    update_sindexes(store, sindexes, &report).unwrap();
}

/// Deletes a row and fans its report out.
fn delete_row(store: &Store, table: &Table, key: &str, stamp_v: u64, sindexes: &[SindexDef]) {
    let mut report = ModReport::new(Key::from(key));
    point_delete(store, table, &Key::from(key), stamp(stamp_v), &mut report).unwrap();
    update_sindexes(store, sindexes, &report).unwrap();
}

/// Dumps a tree as (raw key bytes, document) pairs in key order.
fn dump_tree(store: &Store, tree: TreeId) -> Vec<(Vec<u8>, Value)> {
    let mut txn = store.begin();
    let mut out = Vec::new();
    let mut from = Key::min();
    loop {
        let Some(chunk) = txn.leaf_chunk(tree, &from).unwrap() else {
            break;
        };
        for entry in &chunk.entries {
            let doc = DocRef::from_leaf(entry.value.clone())
                .unwrap()
                .read_document(&mut txn)
                .unwrap();
            out.push((entry.key.as_bytes().to_vec(), doc));
        }
        match chunk.resume {
            Some(next) => from = next,
            None => break,
        }
    }
    out
}

// ============================================================================
// Write Path + Sindex Maintenance
// ============================================================================

#[test]
fn maintenance_and_post_construction_agree() {
    let (_dir, store, table) = setup();

    // Index A is maintained by every write; index B is built afterwards
    // from the final table state. They must end up identical.
    let expr = MapExpr::Field("a".into());
    let def_a = SindexDef::new(SindexId::generate(), "live", TreeId::new(100), &expr);
    let def_b = SindexDef::new(SindexId::generate(), "post", TreeId::new(101), &expr);
    create_sindex(&store, &def_a).unwrap();
    let live = std::slice::from_ref(&def_a);

    // A churny history over disjoint keys: inserts, overwrites, deletes.
    for i in 0..30u64 {
        write_row(
            &store,
            &table,
            json!({"id": format!("k{i:02}"), "a": i % 7}),
            i + 1,
            live,
        );
    }
    for i in (0..30u64).step_by(3) {
        delete_row(&store, &table, &format!("k{i:02}"), 100 + i, live);
    }
    for i in (1..30u64).step_by(4) {
        write_row(
            &store,
            &table,
            json!({"id": format!("k{i:02}"), "a": (i * 11) % 7}),
            200 + i,
            live,
        );
    }

    create_sindex(&store, &def_b).unwrap();
    post_construct_sindexes(
        &store,
        &table,
        &BTreeSet::from([def_b.id]),
        &Interruptor::new(),
    )
    .unwrap();

    let live_entries = dump_tree(&store, def_a.tree);
    let post_entries = dump_tree(&store, def_b.tree);
    assert!(!live_entries.is_empty());
    assert_eq!(live_entries, post_entries);
}

#[test]
fn replace_report_drives_sindex_moves() {
    let (_dir, store, table) = setup();

    let def = SindexDef::new(
        SindexId::generate(),
        "by_a",
        TreeId::new(100),
        &MapExpr::Field("a".into()),
    );
    create_sindex(&store, &def).unwrap();
    let sindexes = std::slice::from_ref(&def);

    // Insert via the replace engine.
    let mut report = ModReport::new(Key::from("1"));
    let resp = replace(
        &store,
        &table,
        &Key::from("1"),
        insert_transform(json!({"id": "1", "a": 5}), false),
        stamp(1),
        &mut report,
    )
    .unwrap();
    assert_eq!(resp.inserted, 1);
    update_sindexes(&store, sindexes, &report).unwrap();

    // Update the indexed attribute through a user transform.
    let mut report = ModReport::new(Key::from("1"));
    let resp = replace(
        &store,
        &table,
        &Key::from("1"),
        |old| {
            let mut doc = old.clone();
            doc["a"] = json!(9);
            Ok(doc)
        },
        stamp(2),
        &mut report,
    )
    .unwrap();
    assert_eq!(resp.replaced, 1);
    update_sindexes(&store, sindexes, &report).unwrap();

    let entries = dump_tree(&store, def.tree);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1, json!({"id": "1", "a": 9}));

    // An unchanged replace emits nothing; the index stays put.
    let mut report = ModReport::new(Key::from("1"));
    let resp = replace(
        &store,
        &table,
        &Key::from("1"),
        |old| Ok(old.clone()),
        stamp(3),
        &mut report,
    )
    .unwrap();
    assert_eq!(resp.unchanged, 1);
    assert!(report.is_noop());
    update_sindexes(&store, sindexes, &report).unwrap();
    assert_eq!(dump_tree(&store, def.tree).len(), 1);
}

#[test]
fn fanout_covers_multiple_sindexes() {
    let (_dir, store, table) = setup();

    let defs: Vec<SindexDef> = [("by_a", "a"), ("by_b", "b"), ("by_c", "c")]
        .iter()
        .enumerate()
        .map(|(i, (name, attr))| {
            let def = SindexDef::new(
                SindexId::generate(),
                *name,
                TreeId::new(100 + i as u64),
                &MapExpr::Field((*attr).into()),
            );
            create_sindex(&store, &def).unwrap();
            def
        })
        .collect();

    for i in 0..10u64 {
        write_row(
            &store,
            &table,
            json!({"id": format!("k{i}"), "a": i, "b": i * 2, "c": format!("s{i}")}),
            i + 1,
            &defs,
        );
    }

    for def in &defs {
        assert_eq!(dump_tree(&store, def.tree).len(), 10);
    }
}

// ============================================================================
// Report Replay (wire format in anger)
// ============================================================================

#[test]
fn replayed_reports_reconstruct_an_index() {
    let (_dir, store, table) = setup();

    let expr = MapExpr::Field("a".into());
    let def_direct = SindexDef::new(SindexId::generate(), "direct", TreeId::new(100), &expr);
    let def_replayed =
        SindexDef::new(SindexId::generate(), "replayed", TreeId::new(101), &expr);

    // Collect encoded reports while maintaining the direct index.
    let mut wire_log: Vec<Vec<u8>> = Vec::new();
    for i in 0..12u64 {
        let doc = json!({"id": format!("k{i}"), "a": i % 4});
        let key = Key::from(doc["id"].as_str().unwrap());
        let mut report = ModReport::new(key.clone());
        point_set(&store, &table, &key, &doc, true, stamp(i + 1), &mut report).unwrap();
        update_sindexes(&store, std::slice::from_ref(&def_direct), &report).unwrap();
        wire_log.push(report.encode());
    }

    // Replay the wire log into the second index.
    for wire in &wire_log {
        let report = ModReport::decode(wire).unwrap();
        update_sindexes(&store, std::slice::from_ref(&def_replayed), &report).unwrap();
    }

    assert_eq!(
        dump_tree(&store, def_direct.tree),
        dump_tree(&store, def_replayed.tree)
    );
}

// ============================================================================
// End-to-End Scenarios
// ============================================================================

#[test]
fn set_get_delete_get_lifecycle() {
    let (_dir, store, table) = setup();
    let doc = json!({"id": "x", "payload": "p".repeat(5_000)});

    let mut report = ModReport::new(Key::from("x"));
    let resp =
        point_set(&store, &table, &Key::from("x"), &doc, false, stamp(1), &mut report).unwrap();
    assert_eq!(resp.result, PointWriteResult::Stored);
    assert_eq!(point_get(&store, &table, &Key::from("x")).unwrap().data, doc);

    let mut report = ModReport::new(Key::from("x"));
    point_delete(&store, &table, &Key::from("x"), stamp(2), &mut report).unwrap();
    assert_eq!(
        point_get(&store, &table, &Key::from("x")).unwrap().data,
        Value::Null
    );
}

#[test]
fn scan_sees_point_writes() {
    let (_dir, store, table) = setup();
    for i in 0..25u64 {
        write_row(&store, &table, json!({"id": format!("k{i:02}"), "n": i}), i + 1, &[]);
    }

    let req = ScanRequest::new(KeyRange::new(Key::from("k05"), Some(Key::from("k10"))));
    let resp = rget(&store, &table, &req).unwrap();
    let crate::RgetResult::Stream(rows) = resp.result else {
        panic!("expected stream");
    };
    let ids: Vec<&str> = rows.iter().map(|(_, d)| d["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["k05", "k06", "k07", "k08", "k09"]);
}

#[test]
fn table_state_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    let table = Table::new(TreeId::new(1), "id");

    let def;
    {
        let store = Store::open(&path).unwrap();
        def = SindexDef::new(
            SindexId::generate(),
            "by_a",
            TreeId::new(100),
            &MapExpr::Field("a".into()),
        );
        create_sindex(&store, &def).unwrap();
        for i in 0..8u64 {
            write_row(
                &store,
                &table,
                json!({"id": format!("k{i}"), "a": i}),
                i + 1,
                std::slice::from_ref(&def),
            );
        }
        store.sync().unwrap();
    }

    {
        let store = Store::open(&path).unwrap();
        assert_eq!(
            point_get(&store, &table, &Key::from("k3")).unwrap().data,
            json!({"id": "k3", "a": 3})
        );
        assert_eq!(dump_tree(&store, def.tree).len(), 8);

        let catalog = crate::sindex_catalog(&store).unwrap();
        assert_eq!(catalog.len(), 1);
    }
}

#[test]
fn pending_sindex_sees_writes_issued_during_construction() {
    let (_dir, store, table) = setup();

    // Rows that exist before the index is declared.
    for i in 0..5u64 {
        write_row(&store, &table, json!({"id": format!("old{i}"), "a": i}), i + 1, &[]);
    }

    let def = SindexDef::new(
        SindexId::generate(),
        "by_a",
        TreeId::new(100),
        &MapExpr::Field("a".into()),
    );
    create_sindex(&store, &def).unwrap();

    // A write lands while the index is still pending: the writer fans out
    // to pending indexes just like ready ones.
    write_row(
        &store,
        &table,
        json!({"id": "new", "a": 99}),
        50,
        std::slice::from_ref(&def),
    );

    post_construct_sindexes(
        &store,
        &table,
        &BTreeSet::from([def.id]),
        &Interruptor::new(),
    )
    .unwrap();

    // Old rows and the concurrent write are all present.
    assert_eq!(dump_tree(&store, def.tree).len(), 6);
}
