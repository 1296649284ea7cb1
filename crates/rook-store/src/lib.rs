//! # rook-store: Page-based B-tree and blob substrate
//!
//! This crate provides the storage substrate for RookDB's document layer:
//! any number of B-trees (primary tables and secondary-index trees) plus a
//! shared blob space, all in a single page file.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  Store / Txn (locking, tree table, blob ops)        │
//! ├──────────────────────────┬──────────────────────────┤
//! │  BTree (lookup, put,     │  Blob chains (create,    │
//! │  remove, leaf chunks,    │  read, clear, fsck)      │
//! │  key distribution)       │                          │
//! ├──────────────────────────┴──────────────────────────┤
//! │  PageCache (LRU, free list, page-aligned I/O)       │
//! ├─────────────────────────────────────────────────────┤
//! │  Page Layer (4KB slotted pages, CRC32)              │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Leaf values are blob references bounded by [`MAX_INLINE_VALUE`]; the
//! document layer above owns what they mean. Each leaf additionally keeps
//! a bounded buffer of recent deletions with write stamps, which is what
//! lets replication backfill report changes since a point in time.

mod blob;
mod btree;
mod cache;
mod error;
mod node;
mod page;
mod store;
mod superblock;
mod types;

#[cfg(test)]
mod tests;

// Public API
pub use blob::{BLOB_CHUNK, BlobRef, INLINE_PAYLOAD_MAX};
pub use btree::{BTreeMeta, LeafChunk};
pub use error::StoreError;
pub use node::{Deletion, LeafEntry};
pub use store::{Store, Txn};
pub use types::{Key, KeyRange, MAX_INLINE_VALUE, MAX_KEY_LENGTH, PAGE_SIZE, PageId, TreeId};
