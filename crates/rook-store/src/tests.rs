//! Integration tests for rook-store
//!
//! Exercises the store as a whole: trees + blobs + persistence together.

use bytes::Bytes;
use rook_types::WriteStamp;
use tempfile::tempdir;

use crate::{BlobRef, Key, Store, StoreError, TreeId};

fn stamp(s: u64) -> WriteStamp {
    WriteStamp::new(s)
}

fn inline_ref(payload: &[u8]) -> Bytes {
    let mut buf = Vec::with_capacity(3 + payload.len());
    buf.push(0x00);
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    Bytes::from(buf)
}

// ============================================================================
// Tree + Blob Integration
// ============================================================================

#[test]
fn document_sized_payloads_roundtrip_through_tree_and_blobs() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().join("store.db")).unwrap();
    let tree = TreeId::new(1);

    let payloads: Vec<Vec<u8>> = vec![
        b"small".to_vec(),
        vec![b'm'; 300],      // just past the inline threshold
        vec![b'l'; 20_000],   // multi-page chain
    ];

    let mut txn = store.begin();
    for (i, payload) in payloads.iter().enumerate() {
        let blob = txn.blob_create(payload).unwrap();
        txn.put(tree, Key::from(format!("doc{i}")), blob.as_bytes().clone(), stamp(i as u64))
            .unwrap();
    }

    for (i, payload) in payloads.iter().enumerate() {
        let entry = txn.lookup(tree, &Key::from(format!("doc{i}"))).unwrap().unwrap();
        let blob = BlobRef::from_leaf_bytes(entry.value).unwrap();
        assert_eq!(txn.blob_read(&blob).unwrap().as_ref(), payload.as_slice());
        txn.blob_fsck(&blob).unwrap();
    }
}

#[test]
fn overwriting_after_clear_recycles_blob_pages() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().join("store.db")).unwrap();
    let tree = TreeId::new(1);
    let key = Key::from("doc");

    let mut txn = store.begin();
    let first = txn.blob_create(&vec![1u8; 12_000]).unwrap();
    txn.put(tree, key.clone(), first.as_bytes().clone(), stamp(1))
        .unwrap();

    // Rewrite the way the document layer does: clear old, create new,
    // overwrite the leaf entry.
    let entry = txn.lookup(tree, &key).unwrap().unwrap();
    let old = BlobRef::from_leaf_bytes(entry.value).unwrap();
    txn.blob_clear(&old).unwrap();
    let fresh = txn.blob_create(&vec![2u8; 12_000]).unwrap();
    txn.put(tree, key.clone(), fresh.as_bytes().clone(), stamp(2))
        .unwrap();

    // The stale reference must now fail its deep check.
    assert!(matches!(
        txn.blob_fsck(&old),
        Err(StoreError::BlobCorrupted(_) | StoreError::PageNotFound(_))
    ));

    let entry = txn.lookup(tree, &key).unwrap().unwrap();
    let current = BlobRef::from_leaf_bytes(entry.value).unwrap();
    assert_eq!(txn.blob_read(&current).unwrap(), vec![2u8; 12_000]);
}

#[test]
fn chunk_traversal_sees_writes_across_many_leaves() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().join("store.db")).unwrap();
    let tree = TreeId::new(1);

    let mut txn = store.begin();
    for i in (0..300).rev() {
        txn.put(
            tree,
            Key::from(format!("key{i:04}")),
            inline_ref(&[i as u8; 40]),
            stamp(i as u64),
        )
        .unwrap();
    }

    let mut seen = Vec::new();
    let mut from = Key::min();
    loop {
        let Some(chunk) = txn.leaf_chunk(tree, &from).unwrap() else {
            break;
        };
        seen.extend(chunk.entries.iter().map(|e| e.key.clone()));
        match chunk.resume {
            Some(next) => from = next,
            None => break,
        }
    }

    assert_eq!(seen.len(), 300);
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "keys in order");
}

#[test]
fn deletions_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.db");
    let tree = TreeId::new(1);

    {
        let store = Store::open(&path).unwrap();
        let mut txn = store.begin();
        txn.put(tree, Key::from("a"), inline_ref(b"x"), stamp(1)).unwrap();
        txn.put(tree, Key::from("b"), inline_ref(b"y"), stamp(2)).unwrap();
        txn.remove(tree, &Key::from("a"), stamp(3)).unwrap();
        drop(txn);
        store.sync().unwrap();
    }

    {
        let store = Store::open(&path).unwrap();
        let mut txn = store.begin();
        let chunk = txn.leaf_chunk(tree, &Key::min()).unwrap().unwrap();
        assert_eq!(chunk.entries.len(), 1);
        assert_eq!(chunk.deletions.len(), 1);
        assert_eq!(chunk.deletions[0].key, Key::from("a"));
        assert_eq!(chunk.deletions[0].stamp, stamp(3));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn tree_matches_model_map(
            ops in prop::collection::vec(
                (prop::collection::vec(any::<u8>(), 1..24), any::<bool>()),
                1..120,
            )
        ) {
            let dir = tempdir().unwrap();
            let store = Store::open(dir.path().join("store.db")).unwrap();
            let tree = TreeId::new(1);
            let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

            let mut txn = store.begin();
            for (i, (raw_key, is_put)) in ops.iter().enumerate() {
                let key = Key::from(raw_key.as_slice());
                if *is_put {
                    let payload = vec![(i % 256) as u8; 8];
                    txn.put(tree, key, inline_ref(&payload), stamp(i as u64)).unwrap();
                    model.insert(raw_key.clone(), payload);
                } else {
                    txn.remove(tree, &key, stamp(i as u64)).unwrap();
                    model.remove(raw_key);
                }
            }

            // Every model entry is found, every removed key is absent.
            for (raw_key, payload) in &model {
                let entry = txn.lookup(tree, &Key::from(raw_key.as_slice())).unwrap();
                let entry = entry.expect("model key missing from tree");
                let blob = BlobRef::from_leaf_bytes(entry.value).unwrap();
                let read = txn.blob_read(&blob).unwrap();
                prop_assert_eq!(read.as_ref(), payload.as_slice());
            }

            // Traversal yields exactly the model keys in order.
            let mut seen = Vec::new();
            let mut from = Key::min();
            loop {
                let Some(chunk) = txn.leaf_chunk(tree, &from).unwrap() else { break };
                seen.extend(chunk.entries.iter().map(|e| e.key.as_bytes().to_vec()));
                match chunk.resume {
                    Some(next) => from = next,
                    None => break,
                }
            }
            let expected: Vec<Vec<u8>> = model.keys().cloned().collect();
            prop_assert_eq!(seen, expected);
        }

        #[test]
        fn successor_and_decrement_bracket_keys(raw in prop::collection::vec(any::<u8>(), 0..32)) {
            let key = Key::from(raw.as_slice());
            prop_assert!(key < key.successor());
            if let Some(prev) = key.decrement() {
                prop_assert!(prev < key);
                prop_assert_eq!(key.successor().decrement(), Some(key));
            }
        }
    }
}
