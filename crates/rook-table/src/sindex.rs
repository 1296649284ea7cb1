//! Secondary indexes: definitions, the catalogue, key encoding, and
//! write-path maintenance.
//!
//! A secondary index is a separate B-tree keyed by
//! `encode_secondary(f(doc), pk)` where `f` is the index's mapping
//! expression; the value is the full row document. Maintenance consumes
//! one modification report per primary write and converts it into a
//! delete+insert pair per index, fanned out in parallel under a drain
//! barrier (a thread scope that joins every task before returning).
//!
//! The catalogue lives in a reserved tree and stores each definition as a
//! document; definitions are created `Pending` and become `Ready` when
//! post-construction completes.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;

use rook_store::{Key, MAX_KEY_LENGTH, Store, TreeId, Txn};
use rook_types::{SindexId, WriteStamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{EvalError, TableError};
use crate::report::ModReport;
use crate::transform::MapExpr;
use crate::value::DocRef;

/// The tree holding the sindex catalogue.
pub const SINDEX_CATALOG_TREE: TreeId = TreeId::new(0);

// ============================================================================
// Definitions & Catalogue
// ============================================================================

/// Lifecycle state of a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SindexState {
    /// Declared, receiving new writes, awaiting post-construction.
    Pending,
    /// Fully populated; coherent with the whole table.
    Ready,
}

/// A secondary-index definition.
///
/// `index_fn` is the serialized mapping expression. It is stored opaquely
/// and deserialized at every use; a definition that no longer
/// deserializes is corruption, not a user error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SindexDef {
    pub id: SindexId,
    pub name: String,
    /// The B-tree holding this index's entries.
    pub tree: TreeId,
    /// Serialized [`MapExpr`].
    pub index_fn: Vec<u8>,
    pub state: SindexState,
}

impl SindexDef {
    /// Creates a `Pending` definition for `expr` over `tree`.
    pub fn new(id: SindexId, name: impl Into<String>, tree: TreeId, expr: &MapExpr) -> Self {
        let index_fn =
            serde_json::to_vec(expr).expect("mapping expressions always serialize");
        Self {
            id,
            name: name.into(),
            tree,
            index_fn,
            state: SindexState::Pending,
        }
    }

    /// Deserializes the index's mapping expression.
    pub fn compile(&self) -> Result<MapExpr, TableError> {
        serde_json::from_slice(&self.index_fn).map_err(|e| {
            warn!(index = %self.id, error = %e, "secondary index description does not deserialize");
            TableError::Corruption(format!(
                "corrupted description of secondary index `{}`: {e}",
                self.name
            ))
        })
    }

    fn catalog_key(id: &SindexId) -> Key {
        Key::from(&id.as_bytes()[..])
    }
}

/// Registers a new index in the catalogue.
pub fn create_sindex(store: &Store, def: &SindexDef) -> Result<(), TableError> {
    debug_assert_eq!(def.state, SindexState::Pending, "new sindexes start pending");
    let mut txn = store.begin();
    write_catalog_row(&mut txn, def)
}

/// Loads the full sindex catalogue.
pub fn sindex_catalog(store: &Store) -> Result<BTreeMap<SindexId, SindexDef>, TableError> {
    let mut txn = store.begin();
    let mut catalog = BTreeMap::new();

    let mut from = Key::min();
    loop {
        let Some(chunk) = txn.leaf_chunk(SINDEX_CATALOG_TREE, &from)? else {
            break;
        };
        for entry in &chunk.entries {
            let doc = DocRef::from_leaf(entry.value.clone())?.read_document(&mut txn)?;
            let def: SindexDef = serde_json::from_value(doc).map_err(|e| {
                TableError::Corruption(format!("undecodable sindex catalogue row: {e}"))
            })?;
            catalog.insert(def.id, def);
        }
        match chunk.resume {
            Some(resume) => from = resume,
            None => break,
        }
    }

    Ok(catalog)
}

/// Marks the given indexes `Ready`.
pub fn mark_sindexes_ready(
    store: &Store,
    ids: &BTreeSet<SindexId>,
) -> Result<(), TableError> {
    let catalog = sindex_catalog(store)?;
    let mut txn = store.begin();
    for id in ids {
        let Some(def) = catalog.get(id) else {
            return Err(TableError::Corruption(format!(
                "unknown secondary index {id}"
            )));
        };
        let mut def = def.clone();
        def.state = SindexState::Ready;
        write_catalog_row(&mut txn, &def)?;
    }
    Ok(())
}

fn write_catalog_row(txn: &mut Txn<'_>, def: &SindexDef) -> Result<(), TableError> {
    let key = SindexDef::catalog_key(&def.id);
    if let Some(existing) = txn.lookup(SINDEX_CATALOG_TREE, &key)? {
        DocRef::from_leaf(existing.value)?.clear(txn)?;
    }
    let doc = serde_json::to_value(def).map_err(|e| {
        TableError::Corruption(format!("unserializable sindex definition: {e}"))
    })?;
    let doc_ref = DocRef::write_document(txn, &doc)?;
    txn.put(
        SINDEX_CATALOG_TREE,
        key,
        doc_ref.as_leaf_bytes(),
        WriteStamp::DISTANT_PAST,
    )?;
    Ok(())
}

// ============================================================================
// Secondary Key Encoding
// ============================================================================

/// Encodes an index value plus the primary key into a composite secondary
/// key: ordered by (value, pk) and unique per row.
///
/// Index values may be null, booleans, numbers, strings, or arrays of
/// those; objects are not indexable. The value encoding is
/// self-delimiting, so appending the primary key keeps the composite
/// both ordered and unambiguous.
pub fn encode_secondary(index_value: &Value, primary_key: &Key) -> Result<Key, EvalError> {
    let mut buf = Vec::with_capacity(16 + primary_key.len());
    encode_index_value(&mut buf, index_value)?;
    buf.extend_from_slice(primary_key.as_bytes());
    if buf.len() > MAX_KEY_LENGTH {
        return Err(EvalError::new(format!(
            "Secondary key too large ({} bytes)",
            buf.len()
        )));
    }
    Ok(Key::from(buf))
}

// Type tags chosen so cross-type order is null < bool < number < string
// < array. Every tag is > 0x00, which keeps the array terminator (0x00)
// ordering prefixes first.
const SK_NULL: u8 = 0x10;
const SK_FALSE: u8 = 0x20;
const SK_TRUE: u8 = 0x21;
const SK_NUMBER: u8 = 0x30;
const SK_STRING: u8 = 0x40;
const SK_ARRAY: u8 = 0x50;

fn encode_index_value(buf: &mut Vec<u8>, v: &Value) -> Result<(), EvalError> {
    match v {
        Value::Null => buf.push(SK_NULL),
        Value::Bool(false) => buf.push(SK_FALSE),
        Value::Bool(true) => buf.push(SK_TRUE),
        Value::Number(n) => {
            buf.push(SK_NUMBER);
            buf.extend_from_slice(&order_preserving_f64(n.as_f64().unwrap_or(0.0)));
        }
        Value::String(s) => {
            buf.push(SK_STRING);
            encode_terminated(buf, s.as_bytes());
        }
        Value::Array(items) => {
            buf.push(SK_ARRAY);
            for item in items {
                encode_index_value(buf, item)?;
            }
            buf.push(0x00);
        }
        Value::Object(_) => {
            return Err(EvalError::new(
                "Secondary indexes cannot be built on OBJECT values",
            ));
        }
    }
    Ok(())
}

/// Sign-flip encoding for doubles: negative numbers invert every bit,
/// non-negative ones flip the sign bit, making the big-endian bytes
/// order like the numbers themselves.
fn order_preserving_f64(f: f64) -> [u8; 8] {
    let bits = f.to_bits();
    let flipped = if bits >> 63 == 1 {
        !bits
    } else {
        bits ^ (1 << 63)
    };
    flipped.to_be_bytes()
}

/// Zero-escaped, zero-terminated byte encoding: embedded 0x00 becomes
/// 0x00 0xFF, and a lone 0x00 terminates. Preserves lexicographic order
/// across different lengths.
fn encode_terminated(buf: &mut Vec<u8>, data: &[u8]) {
    for &b in data {
        buf.push(b);
        if b == 0x00 {
            buf.push(0xFF);
        }
    }
    buf.push(0x00);
}

// ============================================================================
// Maintenance
// ============================================================================

/// Applies one modification report to every given index, in parallel.
///
/// Each index gets its own task under a drain barrier: the scope joins
/// all tasks before this function returns, so no task outlives the
/// caller. Reports with no content (skipped/unchanged writes) suppress
/// the fan-out entirely.
///
/// A report with an empty primary key is caller misuse: it means a
/// default-constructed report was handed over without going through a
/// write operation first.
pub fn update_sindexes(
    store: &Store,
    sindexes: &[SindexDef],
    report: &ModReport,
) -> Result<(), TableError> {
    debug_assert!(
        !report.primary_key.is_empty(),
        "modification report reached the sindex layer with an empty primary key"
    );
    if report.primary_key.is_empty() {
        return Err(TableError::Corruption(
            "modification report with empty primary key".into(),
        ));
    }
    if report.is_noop() {
        return Ok(());
    }

    thread::scope(|scope| {
        let tasks: Vec<_> = sindexes
            .iter()
            .map(|def| scope.spawn(move || update_single_sindex(store, def, report)))
            .collect();

        let mut result = Ok(());
        for task in tasks {
            let outcome = task
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            if result.is_ok() {
                result = outcome;
            }
        }
        result
    })
}

/// Applies one modification report to one index in its own transaction.
pub fn update_single_sindex(
    store: &Store,
    sindex: &SindexDef,
    report: &ModReport,
) -> Result<(), TableError> {
    let mut txn = store.begin();
    update_single_sindex_in(&mut txn, sindex, report)
}

/// The per-index routine, usable inside a caller-held transaction.
///
/// The delete and insert steps share the transaction, which is what lets
/// the insert reuse the position acquired by the delete instead of
/// re-acquiring the root.
pub(crate) fn update_single_sindex_in(
    txn: &mut Txn<'_>,
    sindex: &SindexDef,
    report: &ModReport,
) -> Result<(), TableError> {
    let mapping = sindex.compile()?;

    if let Some(deleted) = &report.deleted {
        let index_value = mapping.eval(deleted)?;
        let skey = encode_secondary(&index_value, &report.primary_key)?;
        if let Some(entry) = txn.lookup(sindex.tree, &skey)? {
            DocRef::from_leaf(entry.value)?.clear(txn)?;
            txn.remove(sindex.tree, &skey, WriteStamp::DISTANT_PAST)?;
        }
    }

    if let Some(added) = &report.added {
        let index_value = mapping.eval(added)?;
        let skey = encode_secondary(&index_value, &report.primary_key)?;
        // Re-running post-construction may hit an entry that is already
        // present; release its payload before overwriting.
        if let Some(existing) = txn.lookup(sindex.tree, &skey)? {
            DocRef::from_leaf(existing.value)?.clear(txn)?;
        }
        let doc_ref = DocRef::write_document(txn, added)?;
        txn.put(
            sindex.tree,
            skey,
            doc_ref.as_leaf_bytes(),
            WriteStamp::DISTANT_PAST,
        )?;
    }

    Ok(())
}
