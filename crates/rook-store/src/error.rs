//! Error types for store operations.

use std::io;

use crate::types::{PageId, TreeId};

/// Errors that can occur during store operations.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Filesystem I/O error.
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),

    /// Page CRC32 checksum mismatch - data corruption detected.
    #[error(
        "page {page_id} corrupted: CRC mismatch (expected {expected:#010x}, got {actual:#010x})"
    )]
    PageCorrupted {
        page_id: PageId,
        expected: u32,
        actual: u32,
    },

    /// Key exceeds maximum allowed length.
    #[error("key too long: {len} bytes exceeds maximum {max}")]
    KeyTooLong { len: usize, max: usize },

    /// Leaf value exceeds the maximum inline reference length.
    #[error("value too large: {len} bytes exceeds maximum {max}")]
    ValueTooLarge { len: usize, max: usize },

    /// Page has invalid magic bytes.
    #[error("invalid page magic: expected {expected:#010x}, got {actual:#010x}")]
    InvalidPageMagic { expected: u32, actual: u32 },

    /// Page has unsupported version or type byte.
    #[error("unsupported page version: {0}")]
    UnsupportedPageVersion(u8),

    /// Superblock has invalid magic bytes.
    #[error("invalid superblock magic")]
    InvalidSuperblockMagic,

    /// Superblock CRC mismatch.
    #[error("superblock corrupted: CRC mismatch")]
    SuperblockCorrupted,

    /// Tree not found.
    #[error("tree {0:?} not found")]
    TreeNotFound(TreeId),

    /// Page overflow - not enough space for insert.
    #[error("page overflow: need {needed} bytes, have {available}")]
    PageOverflow { needed: usize, available: usize },

    /// Internal B-tree invariant violation.
    #[error("B-tree invariant violation: {0}")]
    BTreeInvariant(String),

    /// Page not found in cache or on disk.
    #[error("page {0} not found")]
    PageNotFound(PageId),

    /// Blob reference or blob page chain is damaged.
    #[error("blob corrupted: {0}")]
    BlobCorrupted(String),
}
