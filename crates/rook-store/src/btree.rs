//! B-tree over slotted pages.
//!
//! This module implements the disk-based B-tree used for primary tables and
//! secondary-index trees:
//! - Point lookups via `lookup()`
//! - Insert/replace via `put()` and removal via `remove()` — the commit
//!   points for key-value changes
//! - Ordered traversal one leaf at a time via `leaf_chunk()`
//! - Structural key-distribution sampling via `key_distribution()`
//!
//! Values are opaque byte strings (blob references) bounded by
//! [`MAX_INLINE_VALUE`](crate::types::MAX_INLINE_VALUE); the layer above
//! owns what they reference. Nodes split when their serialized form
//! outgrows a page; underfull nodes are left in place (no merging).

use bytes::Bytes;
use rook_types::WriteStamp;

use crate::cache::PageCache;
use crate::error::StoreError;
use crate::node::{Deletion, InternalNode, LeafEntry, LeafNode};
use crate::page::PageType;
use crate::types::{Key, PageId};

/// Maximum depth of the B-tree (prevents stack overflow in recursive
/// operations).
const MAX_TREE_DEPTH: usize = 32;

/// Metadata for one B-tree.
///
/// This struct stores just the tree metadata; operations go through a
/// transient [`BTree`] handle that pairs it with the page cache.
#[derive(Debug, Clone, Default)]
pub struct BTreeMeta {
    /// Root page ID (None if tree is empty).
    pub root: Option<PageId>,
    /// Current height of the tree (1 = just root leaf).
    pub height: usize,
}

impl BTreeMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: PageId, height: usize) -> Self {
        Self {
            root: Some(root),
            height,
        }
    }
}

/// One leaf's worth of traversal output.
///
/// `resume` is the lower separator of the next leaf (None at the end of
/// the tree): the keys this chunk covers are exactly `[from, resume)`,
/// which is what range erasure and backfill need to make whole-range
/// statements about what they saw.
#[derive(Debug)]
pub struct LeafChunk {
    /// Live entries with key >= the requested start, in key order.
    pub entries: Vec<LeafEntry>,
    /// Buffered deletions with key >= the requested start, oldest first.
    pub deletions: Vec<Deletion>,
    /// Stamp below which this leaf has forgotten its deletions.
    pub horizon: WriteStamp,
    /// Start key of the next chunk, None when the tree is exhausted.
    pub resume: Option<Key>,
}

/// B-tree operations over a page cache.
///
/// Designed to be used transiently: create it, perform operations, discard.
pub struct BTree<'a> {
    meta: &'a mut BTreeMeta,
    cache: &'a mut PageCache,
}

impl<'a> BTree<'a> {
    pub fn new(meta: &'a mut BTreeMeta, cache: &'a mut PageCache) -> Self {
        Self { meta, cache }
    }

    /// Gets the entry stored under a key.
    pub fn lookup(&mut self, key: &Key) -> Result<Option<LeafEntry>, StoreError> {
        let Some(root) = self.meta.root else {
            return Ok(None);
        };

        let (leaf_id, _) = self.find_leaf(root, key, None, 0)?;
        let page = self
            .cache
            .get(leaf_id)?
            .ok_or(StoreError::PageNotFound(leaf_id))?;
        let leaf = LeafNode::from_page(page)?;

        Ok(leaf.get(key).cloned())
    }

    /// Inserts or replaces a key-value pair.
    pub fn put(&mut self, key: Key, recency: WriteStamp, value: Bytes) -> Result<(), StoreError> {
        match self.meta.root {
            None => {
                // Create new root leaf
                let page_id = self.cache.allocate(PageType::Leaf)?;
                let mut leaf = LeafNode::new();
                leaf.insert(key, recency, value);
                let page = self
                    .cache
                    .get_mut(page_id)?
                    .ok_or(StoreError::PageNotFound(page_id))?;
                leaf.to_page(page)?;

                self.meta.root = Some(page_id);
                self.meta.height = 1;
            }
            Some(root) => {
                if let Some((split_key, new_child)) =
                    self.insert_recursive(root, key, recency, value, 0)?
                {
                    // Root split - create new root
                    let new_root_id = self.cache.allocate(PageType::Internal)?;
                    let internal = InternalNode::from_split(root, split_key, new_child);
                    let page = self
                        .cache
                        .get_mut(new_root_id)?
                        .ok_or(StoreError::PageNotFound(new_root_id))?;
                    internal.to_page(page)?;

                    self.meta.root = Some(new_root_id);
                    self.meta.height += 1;
                }
            }
        }

        Ok(())
    }

    /// Removes a key, recording the deletion in the leaf's buffer.
    ///
    /// Returns true if the key existed.
    pub fn remove(&mut self, key: &Key, stamp: WriteStamp) -> Result<bool, StoreError> {
        let Some(root) = self.meta.root else {
            return Ok(false);
        };

        let (leaf_id, _) = self.find_leaf(root, key, None, 0)?;
        let mut leaf = {
            let page = self
                .cache
                .get(leaf_id)?
                .ok_or(StoreError::PageNotFound(leaf_id))?;
            LeafNode::from_page(page)?
        };

        let removed = leaf.remove(key, stamp);
        if removed {
            let page = self
                .cache
                .get_mut(leaf_id)?
                .ok_or(StoreError::PageNotFound(leaf_id))?;
            leaf.to_page(page)?;
        }

        Ok(removed)
    }

    /// Returns the next leaf's worth of entries at or after `from`.
    ///
    /// Leaves with nothing to report (no entries, no buffered deletions, a
    /// zero horizon) are skipped. Returns `None` for an empty tree or once
    /// `from` is past the last leaf.
    pub fn leaf_chunk(&mut self, from: &Key) -> Result<Option<LeafChunk>, StoreError> {
        let Some(root) = self.meta.root else {
            return Ok(None);
        };

        let mut from = from.clone();
        loop {
            let (leaf_id, upper) = self.find_leaf(root, &from, None, 0)?;
            let page = self
                .cache
                .get(leaf_id)?
                .ok_or(StoreError::PageNotFound(leaf_id))?;
            let leaf = LeafNode::from_page(page)?;

            let entries: Vec<LeafEntry> = leaf.entries_from(&from).to_vec();
            let deletions: Vec<Deletion> = leaf
                .deletions()
                .iter()
                .filter(|d| d.key >= from)
                .cloned()
                .collect();
            let horizon = leaf.horizon();

            let has_content = !entries.is_empty()
                || !deletions.is_empty()
                || horizon > WriteStamp::DISTANT_PAST;

            match (has_content, upper) {
                (true, resume) => {
                    return Ok(Some(LeafChunk {
                        entries,
                        deletions,
                        horizon,
                        resume,
                    }));
                }
                (false, None) => return Ok(None),
                (false, Some(next)) => from = next,
            }
        }
    }

    /// Counts keys and collects separator keys down to `max_depth` internal
    /// levels (`max_depth = 1` is the root's separators).
    pub fn key_distribution(
        &mut self,
        max_depth: usize,
    ) -> Result<(u64, Vec<Key>), StoreError> {
        let Some(root) = self.meta.root else {
            return Ok((0, Vec::new()));
        };

        let total = self.count_keys(root, 0)?;
        let mut splits = Vec::new();
        if max_depth > 0 {
            self.collect_splits(root, max_depth, &mut splits, 0)?;
        }
        Ok((total, splits))
    }

    fn count_keys(&mut self, page_id: PageId, depth: usize) -> Result<u64, StoreError> {
        if depth >= MAX_TREE_DEPTH {
            return Err(StoreError::BTreeInvariant("tree too deep".into()));
        }

        let (page_type, payload) = {
            let page = self
                .cache
                .get(page_id)?
                .ok_or(StoreError::PageNotFound(page_id))?;
            match page.page_type() {
                PageType::Leaf => (PageType::Leaf, LeafNode::from_page(page)?.len() as u64),
                PageType::Internal => (PageType::Internal, 0),
                _ => {
                    return Err(StoreError::BTreeInvariant(
                        "hit non-tree page during count".into(),
                    ));
                }
            }
        };

        match page_type {
            PageType::Leaf => Ok(payload),
            _ => {
                let children = {
                    let page = self
                        .cache
                        .get(page_id)?
                        .ok_or(StoreError::PageNotFound(page_id))?;
                    InternalNode::from_page(page)?.children().to_vec()
                };
                let mut total = 0;
                for child in children {
                    total += self.count_keys(child, depth + 1)?;
                }
                Ok(total)
            }
        }
    }

    fn collect_splits(
        &mut self,
        page_id: PageId,
        remaining: usize,
        out: &mut Vec<Key>,
        depth: usize,
    ) -> Result<(), StoreError> {
        if depth >= MAX_TREE_DEPTH {
            return Err(StoreError::BTreeInvariant("tree too deep".into()));
        }

        let node = {
            let page = self
                .cache
                .get(page_id)?
                .ok_or(StoreError::PageNotFound(page_id))?;
            if page.page_type() != PageType::Internal {
                return Ok(());
            }
            InternalNode::from_page(page)?
        };

        if remaining == 1 {
            out.extend_from_slice(node.keys());
        } else {
            for child in node.children().to_vec() {
                self.collect_splits(child, remaining - 1, out, depth + 1)?;
            }
        }
        Ok(())
    }

    /// Descends to the leaf containing `key`, carrying down the tightest
    /// upper separator seen on the way. The returned bound is the first key
    /// of the next leaf's range (None at the right edge of the tree).
    fn find_leaf(
        &mut self,
        page_id: PageId,
        key: &Key,
        upper: Option<Key>,
        depth: usize,
    ) -> Result<(PageId, Option<Key>), StoreError> {
        if depth >= MAX_TREE_DEPTH {
            return Err(StoreError::BTreeInvariant("tree too deep".into()));
        }

        let page = self
            .cache
            .get(page_id)?
            .ok_or(StoreError::PageNotFound(page_id))?;

        match page.page_type() {
            PageType::Leaf => Ok((page_id, upper)),
            PageType::Internal => {
                let internal = InternalNode::from_page(page)?;
                let idx = internal.find_child_index(key);
                let child = internal.children()[idx];
                let child_upper = if idx < internal.key_count() {
                    Some(internal.keys()[idx].clone())
                } else {
                    upper
                };
                self.find_leaf(child, key, child_upper, depth + 1)
            }
            PageType::Blob | PageType::Free => Err(StoreError::BTreeInvariant(
                "hit non-tree page during search".into(),
            )),
        }
    }

    /// Recursively inserts into the tree, returning split info if the node
    /// split.
    fn insert_recursive(
        &mut self,
        page_id: PageId,
        key: Key,
        recency: WriteStamp,
        value: Bytes,
        depth: usize,
    ) -> Result<Option<(Key, PageId)>, StoreError> {
        if depth >= MAX_TREE_DEPTH {
            return Err(StoreError::BTreeInvariant("tree too deep".into()));
        }

        let page_type = {
            let page = self
                .cache
                .get(page_id)?
                .ok_or(StoreError::PageNotFound(page_id))?;
            page.page_type()
        };

        match page_type {
            PageType::Leaf => self.insert_into_leaf(page_id, key, recency, value),
            PageType::Internal => {
                let child_id = {
                    let page = self
                        .cache
                        .get(page_id)?
                        .ok_or(StoreError::PageNotFound(page_id))?;
                    InternalNode::from_page(page)?.find_child(&key)
                };

                if let Some((child_split_key, new_child_id)) =
                    self.insert_recursive(child_id, key, recency, value, depth + 1)?
                {
                    // Child split, insert the new separator into this node
                    self.insert_into_internal(page_id, child_split_key, new_child_id)
                } else {
                    Ok(None)
                }
            }
            PageType::Blob | PageType::Free => Err(StoreError::BTreeInvariant(
                "hit non-tree page during insert".into(),
            )),
        }
    }

    /// Inserts into a leaf node, splitting if it outgrows its page.
    fn insert_into_leaf(
        &mut self,
        page_id: PageId,
        key: Key,
        recency: WriteStamp,
        value: Bytes,
    ) -> Result<Option<(Key, PageId)>, StoreError> {
        let mut leaf = {
            let page = self
                .cache
                .get(page_id)?
                .ok_or(StoreError::PageNotFound(page_id))?;
            LeafNode::from_page(page)?
        };

        leaf.insert(key, recency, value);

        if leaf.overflows() && leaf.len() >= 2 {
            let (split_key, right_leaf) = leaf.split();

            let right_page_id = self.cache.allocate(PageType::Leaf)?;

            let left_page = self
                .cache
                .get_mut(page_id)?
                .ok_or(StoreError::PageNotFound(page_id))?;
            leaf.to_page(left_page)?;

            let right_page = self
                .cache
                .get_mut(right_page_id)?
                .ok_or(StoreError::PageNotFound(right_page_id))?;
            right_leaf.to_page(right_page)?;

            Ok(Some((split_key, right_page_id)))
        } else {
            let page = self
                .cache
                .get_mut(page_id)?
                .ok_or(StoreError::PageNotFound(page_id))?;
            leaf.to_page(page)?;
            Ok(None)
        }
    }

    /// Inserts into an internal node, splitting if it outgrows its page.
    fn insert_into_internal(
        &mut self,
        page_id: PageId,
        key: Key,
        child_id: PageId,
    ) -> Result<Option<(Key, PageId)>, StoreError> {
        let mut internal = {
            let page = self
                .cache
                .get(page_id)?
                .ok_or(StoreError::PageNotFound(page_id))?;
            InternalNode::from_page(page)?
        };

        internal.insert(key, child_id);

        if internal.overflows() && internal.key_count() >= 3 {
            let (split_key, right_internal) = internal.split();

            let right_page_id = self.cache.allocate(PageType::Internal)?;

            let left_page = self
                .cache
                .get_mut(page_id)?
                .ok_or(StoreError::PageNotFound(page_id))?;
            internal.to_page(left_page)?;

            let right_page = self
                .cache
                .get_mut(right_page_id)?
                .ok_or(StoreError::PageNotFound(right_page_id))?;
            right_internal.to_page(right_page)?;

            Ok(Some((split_key, right_page_id)))
        } else {
            let page = self
                .cache
                .get_mut(page_id)?
                .ok_or(StoreError::PageNotFound(page_id))?;
            internal.to_page(page)?;
            Ok(None)
        }
    }
}
