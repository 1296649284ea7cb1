//! Slotted 4KB pages with CRC32 integrity checks.
//!
//! # Page Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Header (32 bytes)                                               │
//! │   Magic (4B) │ Ver (1B) │ Type (1B) │ Items (2B) │ Reserved     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Slot Directory (grows downward): offset (2B) + length (2B) each │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                        Free Space                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Data Area (grows upward from the CRC trailer)                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ CRC32 (4 bytes at offset PAGE_SIZE - 4)                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The slot directory and data area grow toward each other; when they meet
//! the page is full. Removed items leave gaps that are never reclaimed in
//! place — B-tree nodes rebuild their page from scratch on every write, so
//! gaps do not accumulate.

use crate::error::StoreError;
use crate::types::{CRC_SIZE, PAGE_HEADER_SIZE, PAGE_SIZE, PageId};

// ============================================================================
// Constants
// ============================================================================

/// Magic bytes identifying a valid page: "RKPG"
const PAGE_MAGIC: [u8; 4] = *b"RKPG";

/// Current page format version.
const PAGE_VERSION: u8 = 1;

/// Size of each slot directory entry (offset + length).
pub const SLOT_SIZE: usize = 4;

/// Offset where the CRC32 is stored (end of page).
const CRC_OFFSET: usize = PAGE_SIZE - CRC_SIZE;

// ============================================================================
// Page Type
// ============================================================================

/// Type of page in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// B-tree leaf node.
    Leaf = 0,
    /// B-tree internal node.
    Internal = 1,
    /// Link in a blob chain.
    Blob = 2,
    /// Free page (on the free list, available for reuse).
    Free = 3,
}

impl PageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Leaf),
            1 => Some(Self::Internal),
            2 => Some(Self::Blob),
            3 => Some(Self::Free),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

// ============================================================================
// Page Header
// ============================================================================

/// Header at the start of each page.
#[derive(Debug, Clone, Copy)]
struct PageHeader {
    page_type: PageType,
    item_count: u16,
}

impl PageHeader {
    fn new(page_type: PageType) -> Self {
        Self {
            page_type,
            item_count: 0,
        }
    }

    fn serialize(self, buf: &mut [u8; PAGE_HEADER_SIZE]) {
        buf[0..4].copy_from_slice(&PAGE_MAGIC);
        buf[4] = PAGE_VERSION;
        buf[5] = self.page_type.as_byte();
        buf[6..8].copy_from_slice(&self.item_count.to_le_bytes());
        // Reserved bytes (8..32) stay zeroed
        buf[8..32].fill(0);
    }

    fn deserialize(buf: &[u8; PAGE_HEADER_SIZE]) -> Result<Self, StoreError> {
        let magic: [u8; 4] = buf[0..4]
            .try_into()
            .expect("slice length equals 4 after bounds check");
        if magic != PAGE_MAGIC {
            return Err(StoreError::InvalidPageMagic {
                expected: u32::from_le_bytes(PAGE_MAGIC),
                actual: u32::from_le_bytes(magic),
            });
        }

        let version = buf[4];
        if version != PAGE_VERSION {
            return Err(StoreError::UnsupportedPageVersion(version));
        }

        let page_type =
            PageType::from_byte(buf[5]).ok_or(StoreError::UnsupportedPageVersion(buf[5]))?;
        let item_count = u16::from_le_bytes(buf[6..8].try_into().unwrap());

        Ok(Self {
            page_type,
            item_count,
        })
    }
}

// ============================================================================
// Slot Directory Entry
// ============================================================================

/// Entry in the slot directory pointing to an item.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    /// Offset from start of page where item data begins.
    offset: u16,
    /// Length of item data in bytes.
    length: u16,
}

impl Slot {
    fn serialize(self) -> [u8; SLOT_SIZE] {
        let mut buf = [0u8; SLOT_SIZE];
        buf[0..2].copy_from_slice(&self.offset.to_le_bytes());
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    fn deserialize(buf: [u8; SLOT_SIZE]) -> Self {
        Self {
            offset: u16::from_le_bytes(buf[0..2].try_into().unwrap()),
            length: u16::from_le_bytes(buf[2..4].try_into().unwrap()),
        }
    }
}

// ============================================================================
// Page
// ============================================================================

/// A 4KB page with header, slot directory, and data area.
///
/// # Invariants
///
/// - CRC32 at the trailer matches the rest of the page on disk
/// - all slot offsets point at valid data within the page
#[derive(Clone)]
pub struct Page {
    /// The page's unique identifier.
    pub id: PageId,
    /// The raw page data (exactly 4KB).
    data: [u8; PAGE_SIZE],
    /// Cached header for fast access.
    header: PageHeader,
    /// True if the page has been modified since last sync.
    dirty: bool,
    /// True if this page holds raw bytes (the superblock) whose CRC is
    /// managed by the writer, not by `as_bytes()`.
    is_raw: bool,
}

impl Page {
    /// Creates a new empty page with the given type.
    pub fn new(id: PageId, page_type: PageType) -> Self {
        let mut data = [0u8; PAGE_SIZE];
        let header = PageHeader::new(page_type);

        let mut header_buf = [0u8; PAGE_HEADER_SIZE];
        header.serialize(&mut header_buf);
        data[..PAGE_HEADER_SIZE].copy_from_slice(&header_buf);

        let mut page = Self {
            id,
            data,
            header,
            dirty: true,
            is_raw: false,
        };
        page.update_crc();
        page
    }

    /// Loads a page from raw bytes, validating CRC.
    pub fn from_bytes(id: PageId, data: &[u8; PAGE_SIZE]) -> Result<Self, StoreError> {
        let stored_crc =
            u32::from_le_bytes(data[CRC_OFFSET..CRC_OFFSET + CRC_SIZE].try_into().unwrap());
        let computed_crc = crc32fast::hash(&data[..CRC_OFFSET]);

        if stored_crc != computed_crc {
            return Err(StoreError::PageCorrupted {
                page_id: id,
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let header_bytes: [u8; PAGE_HEADER_SIZE] = data[..PAGE_HEADER_SIZE]
            .try_into()
            .expect("slice length equals PAGE_HEADER_SIZE");
        let header = PageHeader::deserialize(&header_bytes)?;

        Ok(Self {
            id,
            data: *data,
            header,
            dirty: false,
            is_raw: false,
        })
    }

    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    pub fn item_count(&self) -> usize {
        self.header.item_count as usize
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the page as clean (after syncing to disk).
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Returns the amount of free space available for a new item (slot
    /// overhead already accounted for).
    pub fn free_space(&self) -> usize {
        let slot_dir_end = self.slot_directory_end();
        let data_start = self.data_area_start();
        data_start.saturating_sub(slot_dir_end)
    }

    fn slot_directory_end(&self) -> usize {
        PAGE_HEADER_SIZE + (self.header.item_count as usize * SLOT_SIZE)
    }

    /// Returns where the data area starts (grows from bottom up).
    fn data_area_start(&self) -> usize {
        let mut min_offset = CRC_OFFSET;
        for i in 0..self.header.item_count as usize {
            let slot = self.get_slot(i);
            min_offset = min_offset.min(slot.offset as usize);
        }
        min_offset
    }

    fn get_slot(&self, index: usize) -> Slot {
        debug_assert!(
            index < self.header.item_count as usize,
            "slot index out of bounds"
        );
        let offset = PAGE_HEADER_SIZE + (index * SLOT_SIZE);
        let slot_bytes: [u8; SLOT_SIZE] = self.data[offset..offset + SLOT_SIZE].try_into().unwrap();
        Slot::deserialize(slot_bytes)
    }

    /// Gets the data for the item at the given index.
    pub fn get_item(&self, index: usize) -> &[u8] {
        let slot = self.get_slot(index);
        &self.data[slot.offset as usize..(slot.offset + slot.length) as usize]
    }

    /// Inserts an item at the given slot index, shifting later slots right.
    ///
    /// # Errors
    ///
    /// Returns `PageOverflow` if there isn't enough space.
    pub fn insert_item(&mut self, index: usize, data: &[u8]) -> Result<(), StoreError> {
        let needed = SLOT_SIZE + data.len();
        let available = self.free_space();

        if needed > available {
            return Err(StoreError::PageOverflow { needed, available });
        }

        // Allocate space for data (grow from bottom up)
        let data_offset = self.data_area_start() - data.len();

        // Shift existing slots if inserting in the middle
        let item_count = self.header.item_count as usize;
        if index < item_count {
            let src_start = PAGE_HEADER_SIZE + (index * SLOT_SIZE);
            let src_end = PAGE_HEADER_SIZE + (item_count * SLOT_SIZE);
            let dst_start = src_start + SLOT_SIZE;
            self.data.copy_within(src_start..src_end, dst_start);
        }

        // Write the new slot
        let slot = Slot {
            offset: data_offset as u16,
            length: data.len() as u16,
        };
        let slot_offset = PAGE_HEADER_SIZE + (index * SLOT_SIZE);
        self.data[slot_offset..slot_offset + SLOT_SIZE].copy_from_slice(&slot.serialize());

        // Write the data
        self.data[data_offset..data_offset + data.len()].copy_from_slice(data);

        self.header.item_count += 1;
        self.sync_header();
        self.dirty = true;

        debug_assert_eq!(self.header.item_count as usize, item_count + 1);

        Ok(())
    }

    /// Removes the item at the given slot index.
    ///
    /// The data space is not reclaimed; node rewrites start from a fresh
    /// item list.
    pub fn remove_item(&mut self, index: usize) {
        debug_assert!(
            index < self.header.item_count as usize,
            "slot index out of bounds"
        );

        let item_count = self.header.item_count as usize;

        if index < item_count - 1 {
            let src_start = PAGE_HEADER_SIZE + ((index + 1) * SLOT_SIZE);
            let src_end = PAGE_HEADER_SIZE + (item_count * SLOT_SIZE);
            let dst_start = PAGE_HEADER_SIZE + (index * SLOT_SIZE);
            self.data.copy_within(src_start..src_end, dst_start);
        }

        self.header.item_count -= 1;
        self.sync_header();
        self.dirty = true;
    }

    /// Removes every item, yielding an empty page of the same type.
    pub fn clear_items(&mut self) {
        self.header.item_count = 0;
        self.sync_header();
        self.dirty = true;
    }

    fn sync_header(&mut self) {
        let mut header_buf = [0u8; PAGE_HEADER_SIZE];
        self.header.serialize(&mut header_buf);
        self.data[..PAGE_HEADER_SIZE].copy_from_slice(&header_buf);
    }

    fn update_crc(&mut self) {
        self.sync_header();
        let crc = crc32fast::hash(&self.data[..CRC_OFFSET]);
        self.data[CRC_OFFSET..CRC_OFFSET + CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
    }

    /// Returns the raw page data for writing to disk, refreshing the CRC
    /// first (unless this is a raw-format page).
    pub fn as_bytes(&mut self) -> &[u8; PAGE_SIZE] {
        if !self.is_raw {
            self.update_crc();
        }
        &self.data
    }

    /// Overwrites the page with raw bytes (for the superblock, which has
    /// its own format and checksum).
    pub fn set_raw_data(&mut self, data: &[u8; PAGE_SIZE]) {
        self.data = *data;
        self.dirty = true;
        self.is_raw = true;
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("type", &self.header.page_type)
            .field("items", &self.header.item_count)
            .field("free_space", &self.free_space())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}
