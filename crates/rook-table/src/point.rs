//! Point operations: get, set, delete at a single key.
//!
//! Each write runs entirely inside one transaction and produces a
//! modification report for the secondary-index layer; fanning the report
//! out (via [`update_sindexes`]) happens after the transaction commits and
//! before the write is acknowledged.
//!
//! [`update_sindexes`]: crate::sindex::update_sindexes

use rook_store::{Key, Store, Txn};
use rook_types::WriteStamp;
use serde_json::Value;

use crate::error::TableError;
use crate::report::ModReport;
use crate::table::Table;
use crate::value::DocRef;

// ============================================================================
// Responses
// ============================================================================

/// Response to a point read. `data` is JSON null for a missing row.
#[derive(Debug, Clone, PartialEq)]
pub struct PointReadResponse {
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointWriteResult {
    Stored,
    /// An entry was already present (whether or not it was overwritten).
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointWriteResponse {
    pub result: PointWriteResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointDeleteResult {
    Deleted,
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointDeleteResponse {
    pub result: PointDeleteResult,
}

// ============================================================================
// Operations
// ============================================================================

/// Reads the document at `key`, or JSON null if absent.
pub fn point_get(
    store: &Store,
    table: &Table,
    key: &Key,
) -> Result<PointReadResponse, TableError> {
    let mut txn = store.begin();
    let data = match txn.lookup(table.tree(), key)? {
        None => Value::Null,
        Some(entry) => DocRef::from_leaf(entry.value)?.read_document(&mut txn)?,
    };
    Ok(PointReadResponse { data })
}

/// Writes `doc` at `key`.
///
/// With `overwrite` unset, an existing entry is left alone; either way
/// the response reports `Duplicate` when one was present, and the report
/// carries the old document as `deleted` and `doc` as `added`.
pub fn point_set(
    store: &Store,
    table: &Table,
    key: &Key,
    doc: &Value,
    overwrite: bool,
    stamp: WriteStamp,
    report: &mut ModReport,
) -> Result<PointWriteResponse, TableError> {
    let mut txn = store.begin();

    let existing = txn.lookup(table.tree(), key)?;
    let had_value = existing.is_some();

    let old_ref = match existing {
        Some(entry) => {
            let old_ref = DocRef::from_leaf(entry.value)?;
            report.deleted = Some(old_ref.read_document(&mut txn)?);
            Some(old_ref)
        }
        None => None,
    };
    report.added = Some(doc.clone());

    if overwrite || !had_value {
        kv_set(&mut txn, table, key, old_ref, doc, stamp)?;
    }

    Ok(PointWriteResponse {
        result: if had_value {
            PointWriteResult::Duplicate
        } else {
            PointWriteResult::Stored
        },
    })
}

/// Deletes the row at `key`, if any.
pub fn point_delete(
    store: &Store,
    table: &Table,
    key: &Key,
    stamp: WriteStamp,
    report: &mut ModReport,
) -> Result<PointDeleteResponse, TableError> {
    let mut txn = store.begin();

    let result = match txn.lookup(table.tree(), key)? {
        None => PointDeleteResult::Missing,
        Some(entry) => {
            let old_ref = DocRef::from_leaf(entry.value)?;
            report.deleted = Some(old_ref.read_document(&mut txn)?);
            kv_delete(&mut txn, table, key, old_ref, stamp)?;
            PointDeleteResult::Deleted
        }
    };

    Ok(PointDeleteResponse { result })
}

// ============================================================================
// Leaf Rewrite Helpers
// ============================================================================

/// Installs `doc` at `key`: release the old payload (if any), allocate a
/// fresh one, overwrite the leaf entry.
pub(crate) fn kv_set(
    txn: &mut Txn<'_>,
    table: &Table,
    key: &Key,
    old_ref: Option<DocRef>,
    doc: &Value,
    stamp: WriteStamp,
) -> Result<(), TableError> {
    if let Some(old) = old_ref {
        old.clear(txn)?;
    }
    let new_ref = DocRef::write_document(txn, doc)?;
    txn.put(table.tree(), key.clone(), new_ref.as_leaf_bytes(), stamp)?;
    Ok(())
}

/// Removes the entry at `key`, releasing its payload.
pub(crate) fn kv_delete(
    txn: &mut Txn<'_>,
    table: &Table,
    key: &Key,
    old_ref: DocRef,
    stamp: WriteStamp,
) -> Result<(), TableError> {
    old_ref.clear(txn)?;
    txn.remove(table.tree(), key, stamp)?;
    Ok(())
}

#[cfg(test)]
mod point_tests {
    use super::*;
    use rook_store::TreeId;
    use serde_json::json;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Store, Table) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        let table = Table::new(TreeId::new(1), "id");
        (dir, store, table)
    }

    fn stamp(s: u64) -> WriteStamp {
        WriteStamp::new(s)
    }

    #[test]
    fn get_missing_returns_null() {
        let (_dir, store, table) = setup();
        let resp = point_get(&store, &table, &Key::from("nope")).unwrap();
        assert_eq!(resp.data, Value::Null);
    }

    #[test]
    fn set_then_get_roundtrips() {
        let (_dir, store, table) = setup();
        let doc = json!({"id": "a", "v": 1});

        let mut report = ModReport::new(Key::from("a"));
        let resp = point_set(&store, &table, &Key::from("a"), &doc, false, stamp(1), &mut report)
            .unwrap();
        assert_eq!(resp.result, PointWriteResult::Stored);
        assert_eq!(report.deleted, None);
        assert_eq!(report.added, Some(doc.clone()));

        assert_eq!(point_get(&store, &table, &Key::from("a")).unwrap().data, doc);
    }

    #[test]
    fn set_without_overwrite_reports_duplicate_and_keeps_row() {
        let (_dir, store, table) = setup();
        let original = json!({"id": "a", "v": 1});
        let update = json!({"id": "a", "v": 2});

        let mut report = ModReport::new(Key::from("a"));
        point_set(&store, &table, &Key::from("a"), &original, false, stamp(1), &mut report)
            .unwrap();

        let mut report = ModReport::new(Key::from("a"));
        let resp = point_set(&store, &table, &Key::from("a"), &update, false, stamp(2), &mut report)
            .unwrap();
        assert_eq!(resp.result, PointWriteResult::Duplicate);
        assert_eq!(report.deleted, Some(original.clone()));
        assert_eq!(report.added, Some(update));

        // Row unchanged without overwrite.
        assert_eq!(
            point_get(&store, &table, &Key::from("a")).unwrap().data,
            original
        );
    }

    #[test]
    fn set_with_overwrite_replaces_row() {
        let (_dir, store, table) = setup();
        let original = json!({"id": "a", "v": 1});
        let update = json!({"id": "a", "v": 2});

        let mut report = ModReport::new(Key::from("a"));
        point_set(&store, &table, &Key::from("a"), &original, true, stamp(1), &mut report)
            .unwrap();

        let mut report = ModReport::new(Key::from("a"));
        let resp = point_set(&store, &table, &Key::from("a"), &update, true, stamp(2), &mut report)
            .unwrap();
        assert_eq!(resp.result, PointWriteResult::Duplicate);
        assert_eq!(
            point_get(&store, &table, &Key::from("a")).unwrap().data,
            update
        );
    }

    #[test]
    fn delete_roundtrip() {
        let (_dir, store, table) = setup();
        let doc = json!({"id": "a", "v": 1});

        let mut report = ModReport::new(Key::from("a"));
        point_set(&store, &table, &Key::from("a"), &doc, false, stamp(1), &mut report).unwrap();

        let mut report = ModReport::new(Key::from("a"));
        let resp = point_delete(&store, &table, &Key::from("a"), stamp(2), &mut report).unwrap();
        assert_eq!(resp.result, PointDeleteResult::Deleted);
        assert_eq!(report.deleted, Some(doc));
        assert_eq!(report.added, None);

        assert_eq!(
            point_get(&store, &table, &Key::from("a")).unwrap().data,
            Value::Null
        );

        // Deleting again reports missing with an untouched report.
        let mut report = ModReport::new(Key::from("a"));
        let resp = point_delete(&store, &table, &Key::from("a"), stamp(3), &mut report).unwrap();
        assert_eq!(resp.result, PointDeleteResult::Missing);
        assert!(report.is_noop());
    }
}
