//! The shared store handle and its transaction guard.
//!
//! A [`Store`] owns the page cache and superblock behind a mutex; every
//! read or write happens inside a [`Txn`] acquired from [`Store::begin`].
//! Holding the guard for the whole of one logical operation is what makes
//! a document write atomic with respect to concurrent operations on the
//! same key: block-level interleaving is mediated entirely by this lock.
//!
//! Blob references handed out by a `Txn` are only meaningful while that
//! `Txn` lives; the guard is the transaction that scopes their validity.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use rook_types::WriteStamp;
use tracing::{debug, info};

use crate::blob::{self, BlobRef};
use crate::btree::{BTree, LeafChunk};
use crate::cache::PageCache;
use crate::error::StoreError;
use crate::node::LeafEntry;
use crate::page::PageType;
use crate::superblock::Superblock;
use crate::types::{Key, MAX_INLINE_VALUE, MAX_KEY_LENGTH, PageId, TreeId};

/// Default page cache capacity (4096 pages = 16MB).
const DEFAULT_CACHE_CAPACITY: usize = 4096;

struct StoreInner {
    cache: PageCache,
    superblock: Superblock,
}

/// Page-backed multi-tree store.
///
/// Holds any number of B-trees (primary tables and secondary-index trees)
/// plus the shared blob space, all in one page file.
pub struct Store {
    inner: Mutex<StoreInner>,
}

impl Store {
    /// Opens or creates a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_capacity(path, DEFAULT_CACHE_CAPACITY)
    }

    /// Opens or creates a store with a custom cache capacity.
    pub fn open_with_capacity(
        path: impl AsRef<Path>,
        cache_capacity: usize,
    ) -> Result<Self, StoreError> {
        let mut cache = PageCache::open(path.as_ref(), Some(cache_capacity))?;

        let superblock = if cache.next_page_id() == PageId::new(0) {
            // New file - create superblock page
            let sb = Superblock::new();

            let page_id = cache.allocate(PageType::Free)?;
            debug_assert_eq!(page_id, PageId::SUPERBLOCK);

            write_superblock(&mut cache, &sb)?;
            info!(path = %path.as_ref().display(), "created new store");

            sb
        } else {
            // Existing file - load superblock (raw read, custom format)
            let raw = cache.read_raw(PageId::SUPERBLOCK)?;
            let sb = Superblock::deserialize(&raw)?;
            debug!(
                path = %path.as_ref().display(),
                trees = sb.trees.len(),
                next_page = %sb.next_page_id,
                "opened existing store"
            );
            sb
        };

        cache.set_free_head(superblock.free_head);

        Ok(Self {
            inner: Mutex::new(StoreInner { cache, superblock }),
        })
    }

    /// Begins a transaction, taking the store lock until the guard drops.
    pub fn begin(&self) -> Txn<'_> {
        Txn {
            inner: self
                .inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Flushes all dirty pages and the superblock to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let inner = &mut *guard;

        inner.superblock.next_page_id = inner.cache.next_page_id();
        inner.superblock.free_head = inner.cache.free_head();
        write_superblock(&mut inner.cache, &inner.superblock)?;
        inner.cache.sync()?;

        Ok(())
    }
}

fn write_superblock(cache: &mut PageCache, sb: &Superblock) -> Result<(), StoreError> {
    if let Some(page) = cache.get_mut(PageId::SUPERBLOCK)? {
        page.set_raw_data(&sb.serialize());
    }
    Ok(())
}

// ============================================================================
// Transactions
// ============================================================================

/// Exclusive access to the store for one logical operation.
///
/// All tree and blob operations go through this guard. Trees spring into
/// existence on first write; looking up a tree that was never written
/// yields nothing.
pub struct Txn<'a> {
    inner: MutexGuard<'a, StoreInner>,
}

impl Txn<'_> {
    /// Gets the leaf entry stored under a key.
    pub fn lookup(&mut self, tree: TreeId, key: &Key) -> Result<Option<LeafEntry>, StoreError> {
        let inner = &mut *self.inner;
        let Some(mut meta) = inner.superblock.trees.get(&tree).cloned() else {
            return Ok(None);
        };
        BTree::new(&mut meta, &mut inner.cache).lookup(key)
    }

    /// Inserts or replaces a key-value pair. The value must be a blob
    /// reference of at most [`MAX_INLINE_VALUE`] bytes.
    pub fn put(
        &mut self,
        tree: TreeId,
        key: Key,
        value: Bytes,
        stamp: WriteStamp,
    ) -> Result<(), StoreError> {
        if key.len() > MAX_KEY_LENGTH {
            return Err(StoreError::KeyTooLong {
                len: key.len(),
                max: MAX_KEY_LENGTH,
            });
        }
        if value.len() > MAX_INLINE_VALUE {
            return Err(StoreError::ValueTooLarge {
                len: value.len(),
                max: MAX_INLINE_VALUE,
            });
        }

        let inner = &mut *self.inner;
        let mut meta = inner
            .superblock
            .trees
            .get(&tree)
            .cloned()
            .unwrap_or_default();
        BTree::new(&mut meta, &mut inner.cache).put(key, stamp, value)?;
        inner.superblock.trees.insert(tree, meta);
        Ok(())
    }

    /// Removes a key. Returns true if it existed.
    pub fn remove(
        &mut self,
        tree: TreeId,
        key: &Key,
        stamp: WriteStamp,
    ) -> Result<bool, StoreError> {
        let inner = &mut *self.inner;
        let Some(mut meta) = inner.superblock.trees.get(&tree).cloned() else {
            return Ok(false);
        };
        let removed = BTree::new(&mut meta, &mut inner.cache).remove(key, stamp)?;
        inner.superblock.trees.insert(tree, meta);
        Ok(removed)
    }

    /// Returns the next leaf's worth of entries at or after `from`.
    pub fn leaf_chunk(
        &mut self,
        tree: TreeId,
        from: &Key,
    ) -> Result<Option<LeafChunk>, StoreError> {
        let inner = &mut *self.inner;
        let Some(mut meta) = inner.superblock.trees.get(&tree).cloned() else {
            return Ok(None);
        };
        BTree::new(&mut meta, &mut inner.cache).leaf_chunk(from)
    }

    /// Counts keys and collects separators down to `max_depth` levels.
    pub fn key_distribution(
        &mut self,
        tree: TreeId,
        max_depth: usize,
    ) -> Result<(u64, Vec<Key>), StoreError> {
        let inner = &mut *self.inner;
        let Some(mut meta) = inner.superblock.trees.get(&tree).cloned() else {
            return Ok((0, Vec::new()));
        };
        BTree::new(&mut meta, &mut inner.cache).key_distribution(max_depth)
    }

    /// Writes a payload into the blob space, returning a fresh reference.
    pub fn blob_create(&mut self, data: &[u8]) -> Result<BlobRef, StoreError> {
        blob::create(&mut self.inner.cache, data)
    }

    /// Reads the payload behind a reference.
    pub fn blob_read(&mut self, blob: &BlobRef) -> Result<Bytes, StoreError> {
        blob::read(&mut self.inner.cache, blob)
    }

    /// Releases the payload behind a reference.
    pub fn blob_clear(&mut self, blob: &BlobRef) -> Result<(), StoreError> {
        blob::clear(&mut self.inner.cache, blob)
    }

    /// Deep-checks that every page a reference depends on is intact.
    pub fn blob_fsck(&mut self, blob: &BlobRef) -> Result<(), StoreError> {
        blob::fsck(&mut self.inner.cache, blob)
    }
}
