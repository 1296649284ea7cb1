//! Superblock for store metadata persistence.
//!
//! The superblock is stored in page 0 and contains:
//! - Magic bytes for identification
//! - Next available page ID and the free-list head
//! - Tree roots (mapping from `TreeId` to B-tree root pages)
//!
//! # Format
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Magic (8 bytes): "ROOKSTOR"                                   │
//! │ Version (4 bytes): u32 LE                                     │
//! │ Next Page ID (8 bytes): u64 LE                                │
//! │ Free List Head (8 bytes): u64 LE (MAX = empty)                │
//! │ Tree Count (4 bytes): u32 LE                                  │
//! │ Trees: [TreeId (8B), Root PageId (8B), Height (4B)] * count   │
//! │ Padding to page size - 4                                      │
//! │ CRC32 (4 bytes): u32 LE                                       │
//! └───────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use crate::btree::BTreeMeta;
use crate::error::StoreError;
use crate::types::{CRC_SIZE, PAGE_SIZE, PageId, TreeId};

// ============================================================================
// Constants
// ============================================================================

/// Magic bytes identifying a valid superblock.
const SUPERBLOCK_MAGIC: &[u8; 8] = b"ROOKSTOR";

/// Current superblock format version.
const SUPERBLOCK_VERSION: u32 = 1;

/// Header size before tree entries.
const HEADER_SIZE: usize = 8 + 4 + 8 + 8 + 4; // 32 bytes

/// Size of each tree entry.
const TREE_ENTRY_SIZE: usize = 8 + 8 + 4; // TreeId + PageId + Height = 20 bytes

/// Sentinel for "no root" / "no free page".
const NONE_SENTINEL: u64 = u64::MAX;

// ============================================================================
// Superblock
// ============================================================================

/// Store metadata persisted in page 0.
#[derive(Debug, Clone)]
pub struct Superblock {
    /// Next page ID to allocate.
    pub next_page_id: PageId,
    /// Head of the free-page chain.
    pub free_head: Option<PageId>,
    /// Tree ID to B-tree metadata mapping.
    pub trees: HashMap<TreeId, BTreeMeta>,
}

impl Superblock {
    /// Creates a new superblock for an empty store.
    pub fn new() -> Self {
        Self {
            next_page_id: PageId::new(1), // Page 0 is the superblock
            free_head: None,
            trees: HashMap::new(),
        }
    }

    /// Serializes the superblock to a page-sized buffer.
    pub fn serialize(&self) -> [u8; PAGE_SIZE] {
        let mut buf = [0u8; PAGE_SIZE];
        let mut offset = 0;

        buf[offset..offset + 8].copy_from_slice(SUPERBLOCK_MAGIC);
        offset += 8;

        buf[offset..offset + 4].copy_from_slice(&SUPERBLOCK_VERSION.to_le_bytes());
        offset += 4;

        buf[offset..offset + 8].copy_from_slice(&self.next_page_id.as_u64().to_le_bytes());
        offset += 8;

        let free = self.free_head.map_or(NONE_SENTINEL, PageId::as_u64);
        buf[offset..offset + 8].copy_from_slice(&free.to_le_bytes());
        offset += 8;

        buf[offset..offset + 4].copy_from_slice(&(self.trees.len() as u32).to_le_bytes());
        offset += 4;

        for (tree_id, meta) in &self.trees {
            buf[offset..offset + 8].copy_from_slice(&tree_id.as_u64().to_le_bytes());
            offset += 8;

            let root_id = meta.root.map_or(NONE_SENTINEL, PageId::as_u64);
            buf[offset..offset + 8].copy_from_slice(&root_id.to_le_bytes());
            offset += 8;

            buf[offset..offset + 4].copy_from_slice(&(meta.height as u32).to_le_bytes());
            offset += 4;
        }

        // CRC32 at the end
        let crc = crc32fast::hash(&buf[..PAGE_SIZE - CRC_SIZE]);
        buf[PAGE_SIZE - CRC_SIZE..].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Deserializes a superblock from a page-sized buffer.
    pub fn deserialize(buf: &[u8; PAGE_SIZE]) -> Result<Self, StoreError> {
        // Verify CRC first
        let stored_crc = u32::from_le_bytes(buf[PAGE_SIZE - CRC_SIZE..].try_into().unwrap());
        let computed_crc = crc32fast::hash(&buf[..PAGE_SIZE - CRC_SIZE]);

        if stored_crc != computed_crc {
            return Err(StoreError::SuperblockCorrupted);
        }

        let mut offset = 0;

        let magic: [u8; 8] = buf[offset..offset + 8].try_into().unwrap();
        if &magic != SUPERBLOCK_MAGIC {
            return Err(StoreError::InvalidSuperblockMagic);
        }
        offset += 8;

        let version = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        if version != SUPERBLOCK_VERSION {
            return Err(StoreError::UnsupportedPageVersion(version as u8));
        }
        offset += 4;

        let next_page_id = PageId::new(u64::from_le_bytes(
            buf[offset..offset + 8].try_into().unwrap(),
        ));
        offset += 8;

        let free = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        let free_head = if free == NONE_SENTINEL {
            None
        } else {
            Some(PageId::new(free))
        };
        offset += 8;

        let tree_count = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4;

        if HEADER_SIZE + tree_count * TREE_ENTRY_SIZE > PAGE_SIZE - CRC_SIZE {
            return Err(StoreError::SuperblockCorrupted);
        }

        let mut trees = HashMap::with_capacity(tree_count);
        for _ in 0..tree_count {
            let tree_id = TreeId::new(u64::from_le_bytes(
                buf[offset..offset + 8].try_into().unwrap(),
            ));
            offset += 8;

            let root_id = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
            let root = if root_id == NONE_SENTINEL {
                None
            } else {
                Some(PageId::new(root_id))
            };
            offset += 8;

            let height = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4;

            trees.insert(tree_id, BTreeMeta { root, height });
        }

        Ok(Self {
            next_page_id,
            free_head,
            trees,
        })
    }

    /// Returns the maximum number of trees that can fit in a superblock.
    pub fn max_trees() -> usize {
        (PAGE_SIZE - HEADER_SIZE - CRC_SIZE) / TREE_ENTRY_SIZE
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod superblock_tests {
    use super::*;

    #[test]
    fn empty_superblock_roundtrip() {
        let sb = Superblock::new();
        let bytes = sb.serialize();
        let loaded = Superblock::deserialize(&bytes).unwrap();

        assert_eq!(loaded.next_page_id, PageId::new(1));
        assert_eq!(loaded.free_head, None);
        assert!(loaded.trees.is_empty());
    }

    #[test]
    fn superblock_with_trees_roundtrip() {
        let mut sb = Superblock::new();
        sb.next_page_id = PageId::new(50);
        sb.free_head = Some(PageId::new(12));

        sb.trees
            .insert(TreeId::new(1), BTreeMeta::with_root(PageId::new(10), 2));
        sb.trees
            .insert(TreeId::new(2), BTreeMeta::with_root(PageId::new(20), 3));
        sb.trees.insert(TreeId::new(3), BTreeMeta::new()); // Empty tree

        let bytes = sb.serialize();
        let loaded = Superblock::deserialize(&bytes).unwrap();

        assert_eq!(loaded.next_page_id, PageId::new(50));
        assert_eq!(loaded.free_head, Some(PageId::new(12)));
        assert_eq!(loaded.trees.len(), 3);

        let t1 = loaded.trees.get(&TreeId::new(1)).unwrap();
        assert_eq!(t1.root, Some(PageId::new(10)));
        assert_eq!(t1.height, 2);

        let t3 = loaded.trees.get(&TreeId::new(3)).unwrap();
        assert_eq!(t3.root, None);
    }

    #[test]
    fn superblock_corruption_detection() {
        let sb = Superblock::new();
        let mut bytes = sb.serialize();

        bytes[40] ^= 0xFF;

        let result = Superblock::deserialize(&bytes);
        assert!(matches!(result, Err(StoreError::SuperblockCorrupted)));
    }

    #[test]
    fn superblock_fits_many_trees() {
        assert!(Superblock::max_trees() > 100);
    }
}
