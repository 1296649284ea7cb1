//! Bulk range erasure.
//!
//! Walks a key range under write, releasing each accepted entry's payload
//! and removing its leaf entry; structural rebalancing is the tree's
//! problem. No modification reports are emitted: callers that need
//! sindex-coherent erasure must drive sindex cleanup themselves.

use rook_store::{Key, KeyRange, Store};
use rook_types::WriteStamp;
use tracing::debug;

use crate::error::TableError;
use crate::table::Table;
use crate::value::DocRef;

/// Erases every key in `(left_exclusive, right_inclusive]` accepted by
/// `tester`. `None` bounds are unbounded. Returns the number of rows
/// erased.
///
/// TODO: emit per-row modification reports so callers can keep sindexes
/// coherent without re-scanning the erased range.
pub fn erase_range(
    store: &Store,
    table: &Table,
    tester: &dyn Fn(&Key) -> bool,
    left_exclusive: Option<&Key>,
    right_inclusive: Option<&Key>,
    stamp: WriteStamp,
) -> Result<u64, TableError> {
    let mut from = match left_exclusive {
        Some(bound) => bound.successor(),
        None => Key::min(),
    };
    let mut erased = 0u64;

    'walk: loop {
        let mut txn = store.begin();
        let Some(chunk) = txn.leaf_chunk(table.tree(), &from)? else {
            break;
        };

        for entry in &chunk.entries {
            if let Some(right) = right_inclusive {
                if entry.key > *right {
                    break 'walk;
                }
            }
            if !tester(&entry.key) {
                continue;
            }
            DocRef::from_leaf(entry.value.clone())?.clear(&mut txn)?;
            txn.remove(table.tree(), &entry.key, stamp)?;
            erased += 1;
        }

        drop(txn);
        match chunk.resume {
            Some(resume) => from = resume,
            None => break,
        }
    }

    debug!(table = %table.tree(), erased, "erased key range");
    Ok(erased)
}

/// Convenience wrapper over [`erase_range`] taking a half-open
/// `[left, right)` range, converted by decrementing the boundaries.
pub fn erase_half_open(
    store: &Store,
    table: &Table,
    tester: &dyn Fn(&Key) -> bool,
    range: &KeyRange,
    stamp: WriteStamp,
) -> Result<u64, TableError> {
    // The left bound becomes exclusive by decrementing; an empty left key
    // has no predecessor, which is exactly the unbounded case.
    let left_exclusive = range.left.decrement();

    // A bounded right becomes inclusive by decrementing; a right bound
    // with no predecessor means the range is empty.
    let right_inclusive = match &range.right {
        None => None,
        Some(right) => match right.decrement() {
            Some(prev) => Some(prev),
            None => return Ok(0),
        },
    };

    erase_range(
        store,
        table,
        tester,
        left_exclusive.as_ref(),
        right_inclusive.as_ref(),
        stamp,
    )
}

#[cfg(test)]
mod erase_tests {
    use super::*;
    use crate::point::{point_get, point_set};
    use crate::report::ModReport;
    use rook_store::TreeId;
    use serde_json::{Value, json};
    use tempfile::tempdir;

    fn setup_rows(n: usize) -> (tempfile::TempDir, Store, Table) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        let table = Table::new(TreeId::new(1), "id");
        for i in 0..n {
            let key = Key::from(format!("row{i:02}"));
            let doc = json!({"id": format!("row{i:02}"), "n": i});
            let mut report = ModReport::new(key.clone());
            point_set(&store, &table, &key, &doc, false, WriteStamp::new(1), &mut report)
                .unwrap();
        }
        (dir, store, table)
    }

    fn accept_all(_: &Key) -> bool {
        true
    }

    #[test]
    fn erases_half_open_range() {
        let (_dir, store, table) = setup_rows(10);

        let range = KeyRange::new(Key::from("row03"), Some(Key::from("row07")));
        let erased =
            erase_half_open(&store, &table, &accept_all, &range, WriteStamp::new(9)).unwrap();
        assert_eq!(erased, 4);

        for i in 0..10 {
            let key = Key::from(format!("row{i:02}"));
            let present =
                point_get(&store, &table, &key).unwrap().data != Value::Null;
            assert_eq!(present, !(3..7).contains(&i), "row{i:02}");
        }
    }

    #[test]
    fn unbounded_erase_clears_table() {
        let (_dir, store, table) = setup_rows(6);

        let erased =
            erase_range(&store, &table, &accept_all, None, None, WriteStamp::new(9)).unwrap();
        assert_eq!(erased, 6);

        let key = Key::from("row00");
        assert_eq!(point_get(&store, &table, &key).unwrap().data, Value::Null);
    }

    #[test]
    fn tester_filters_keys() {
        let (_dir, store, table) = setup_rows(10);

        let odd_only = |key: &Key| -> bool {
            let s = String::from_utf8_lossy(key.as_bytes());
            s.trim_start_matches("row")
                .parse::<u32>()
                .map(|n| n % 2 == 1)
                .unwrap_or(false)
        };
        let erased = erase_range(
            &store,
            &table,
            &odd_only,
            None,
            None,
            WriteStamp::new(9),
        )
        .unwrap();
        assert_eq!(erased, 5);

        assert_ne!(
            point_get(&store, &table, &Key::from("row00")).unwrap().data,
            Value::Null
        );
        assert_eq!(
            point_get(&store, &table, &Key::from("row01")).unwrap().data,
            Value::Null
        );
    }

    #[test]
    fn empty_right_bound_erases_nothing() {
        let (_dir, store, table) = setup_rows(3);
        let range = KeyRange::new(Key::min(), Some(Key::min()));
        let erased =
            erase_half_open(&store, &table, &accept_all, &range, WriteStamp::new(9)).unwrap();
        assert_eq!(erased, 0);
    }
}
