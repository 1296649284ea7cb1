//! The leaf value codec and document I/O.
//!
//! A leaf value in a table's B-tree is a [`BlobRef`] — a bounded-size
//! reference that owns the serialized document it points at. [`DocRef`]
//! wraps that reference with document semantics: reading deserializes one
//! JSON document and fails fast on corruption, writing serializes into a
//! freshly allocated blob, clearing releases the payload.
//!
//! Writes never mutate a payload in place: rewriting a row means clearing
//! the old reference and installing a new one. A cleared reference is
//! dead; the transaction that produced it is the scope of its validity.

use bytes::Bytes;
use rook_store::{BlobRef, MAX_INLINE_VALUE, Txn};
use serde_json::Value;

use crate::error::TableError;

/// A leaf value: a validated blob reference carrying one JSON document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRef {
    blob: BlobRef,
}

impl DocRef {
    /// Wraps raw leaf-value bytes. Fails with a corruption error if the
    /// bytes are not a well-formed blob reference.
    pub fn from_leaf(value: Bytes) -> Result<Self, TableError> {
        Ok(Self {
            blob: BlobRef::from_leaf_bytes(value)?,
        })
    }

    /// The raw bytes to store in the leaf.
    pub fn as_leaf_bytes(&self) -> Bytes {
        self.blob.as_bytes().clone()
    }

    /// The length in bytes this reference occupies in the leaf.
    pub fn size(&self) -> usize {
        self.blob.inline_size()
    }

    /// Whether this reference still fits if the leaf's remaining space is
    /// `budget` bytes.
    pub fn fits(&self, budget: usize) -> bool {
        self.size() <= budget
    }

    /// The constant upper bound on any leaf reference.
    pub const fn max_inline_size() -> usize {
        MAX_INLINE_VALUE
    }

    /// Verifies that every block this reference depends on is fetchable
    /// and consistent with the reference's bookkeeping.
    pub fn deep_fsck(&self, txn: &mut Txn<'_>) -> Result<(), TableError> {
        if !self.fits(Self::max_inline_size()) {
            return Err(TableError::Corruption(format!(
                "leaf reference of {} bytes exceeds the inline budget",
                self.size()
            )));
        }
        txn.blob_fsck(&self.blob)?;
        Ok(())
    }

    /// Reads the referenced payload and deserializes one JSON document.
    pub fn read_document(&self, txn: &mut Txn<'_>) -> Result<Value, TableError> {
        let payload = txn.blob_read(&self.blob)?;
        serde_json::from_slice(&payload).map_err(|e| {
            TableError::Corruption(format!("undecodable document payload: {e}"))
        })
    }

    /// Serializes a document into a fresh blob and returns the new leaf
    /// reference. The previous reference for the row, if any, must be
    /// cleared by the caller before the leaf entry is overwritten.
    pub fn write_document(txn: &mut Txn<'_>, doc: &Value) -> Result<Self, TableError> {
        let payload = serde_json::to_vec(doc).map_err(|e| {
            TableError::Corruption(format!("unserializable document: {e}"))
        })?;
        Ok(Self {
            blob: txn.blob_create(&payload)?,
        })
    }

    /// Releases the referenced payload. The reference is invalid
    /// afterwards and must not be stored or read through again.
    pub fn clear(&self, txn: &mut Txn<'_>) -> Result<(), TableError> {
        txn.blob_clear(&self.blob)?;
        Ok(())
    }
}

/// Coarse, monotone estimate of a document's in-stream size.
///
/// Used for range-scan truncation and reduction-state watermarks. The
/// exact formula is not load-bearing; growing the document must never
/// shrink the estimate.
pub fn estimate_doc_size(doc: &Value) -> usize {
    match doc {
        Value::Null | Value::Bool(_) | Value::Number(_) => 8,
        Value::String(s) => 8 + s.len(),
        Value::Array(items) => 16 + items.iter().map(estimate_doc_size).sum::<usize>(),
        Value::Object(fields) => {
            16 + fields
                .iter()
                .map(|(k, v)| k.len() + estimate_doc_size(v))
                .sum::<usize>()
        }
    }
}
