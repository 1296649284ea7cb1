//! Page cache with LRU eviction, free-list recycling, and page-aligned I/O.
//!
//! The [`PageCache`] provides:
//! - In-memory caching of frequently accessed pages
//! - LRU eviction when the cache is full (dirty pages written back first)
//! - Recycling of freed pages through an on-disk free list
//!
//! The free list is a chain of [`PageType::Free`] pages, each holding the
//! id of the next free page as its only item. The head of the chain lives
//! here between syncs and is persisted in the superblock.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::StoreError;
use crate::page::{Page, PageType};
use crate::types::{PAGE_SIZE, PageId};

/// Default cache capacity in pages (16MB with 4KB pages).
const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Sentinel for "no next free page" in a free-list link.
const FREE_LIST_END: u64 = u64::MAX;

/// A node in the LRU doubly-linked list.
struct LruNode {
    prev: Option<PageId>,
    next: Option<PageId>,
}

/// Page cache with LRU eviction policy.
///
/// # Design
///
/// The cache maintains:
/// - A `HashMap` for O(1) page lookups
/// - A doubly-linked list for O(1) LRU tracking
/// - The free-list head for page recycling
///
/// When the cache is full, the least recently used page is evicted; dirty
/// pages are written to disk before eviction.
pub struct PageCache {
    /// Cached pages indexed by page ID.
    pages: HashMap<PageId, Page>,
    /// LRU tracking: `page_id` -> (prev, next) in LRU order.
    lru: HashMap<PageId, LruNode>,
    /// Head of LRU list (most recently used).
    lru_head: Option<PageId>,
    /// Tail of LRU list (least recently used).
    lru_tail: Option<PageId>,
    /// Maximum number of pages to cache.
    capacity: usize,
    /// The backing file for page storage.
    file: File,
    /// Next page ID to allocate when the free list is empty.
    next_page_id: PageId,
    /// Head of the free-page chain.
    free_head: Option<PageId>,
}

impl PageCache {
    /// Opens or creates a page cache backed by the given file.
    pub fn open(path: &Path, capacity: Option<usize>) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let next_page_id = PageId::new(file_len / PAGE_SIZE as u64);

        Ok(Self {
            pages: HashMap::new(),
            lru: HashMap::new(),
            lru_head: None,
            lru_tail: None,
            capacity: capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
            file,
            next_page_id,
            free_head: None,
        })
    }

    /// Returns the next page ID that will be allocated from fresh space.
    pub fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    /// Returns the current free-list head for superblock persistence.
    pub fn free_head(&self) -> Option<PageId> {
        self.free_head
    }

    /// Restores the free-list head after loading the superblock.
    pub fn set_free_head(&mut self, head: Option<PageId>) {
        self.free_head = head;
    }

    /// Allocates a page of the given type, reusing a freed page if one is
    /// available and extending the file otherwise.
    pub fn allocate(&mut self, page_type: PageType) -> Result<PageId, StoreError> {
        if let Some(free_id) = self.free_head {
            // Pop the free-list head and repurpose it in place.
            let next = {
                let page = self
                    .get(free_id)?
                    .ok_or(StoreError::PageNotFound(free_id))?;
                debug_assert_eq!(page.page_type(), PageType::Free, "free list hit a live page");
                let link = page.get_item(0);
                if link.len() != 8 {
                    return Err(StoreError::BTreeInvariant(
                        "malformed free-list link".into(),
                    ));
                }
                u64::from_le_bytes(link.try_into().unwrap())
            };
            self.free_head = if next == FREE_LIST_END {
                None
            } else {
                Some(PageId::new(next))
            };
            self.replace_page(Page::new(free_id, page_type))?;
            return Ok(free_id);
        }

        let page_id = self.next_page_id;
        self.next_page_id = self.next_page_id.next();

        let page = Page::new(page_id, page_type);
        self.insert_page(page)?;

        Ok(page_id)
    }

    /// Returns a page to the free list.
    pub fn free(&mut self, page_id: PageId) -> Result<(), StoreError> {
        let mut page = Page::new(page_id, PageType::Free);
        let link = match self.free_head {
            Some(head) => head.as_u64(),
            None => FREE_LIST_END,
        };
        page.insert_item(0, &link.to_le_bytes())?;
        self.replace_page(page)?;
        self.free_head = Some(page_id);
        Ok(())
    }

    /// Gets a page by ID, loading from disk if necessary.
    ///
    /// Returns `None` if the page doesn't exist.
    pub fn get(&mut self, page_id: PageId) -> Result<Option<&Page>, StoreError> {
        if self.pages.contains_key(&page_id) {
            self.touch(page_id);
            return Ok(self.pages.get(&page_id));
        }

        if page_id.as_u64() >= self.next_page_id.as_u64() {
            return Ok(None);
        }

        let page = self.load_page(page_id)?;
        self.insert_page(page)?;

        Ok(self.pages.get(&page_id))
    }

    /// Gets a mutable reference to a page.
    pub fn get_mut(&mut self, page_id: PageId) -> Result<Option<&mut Page>, StoreError> {
        if !self.pages.contains_key(&page_id) {
            if page_id.as_u64() >= self.next_page_id.as_u64() {
                return Ok(None);
            }
            let page = self.load_page(page_id)?;
            self.insert_page(page)?;
        }

        self.touch(page_id);
        Ok(self.pages.get_mut(&page_id))
    }

    /// Loads a page from disk.
    fn load_page(&mut self, page_id: PageId) -> Result<Page, StoreError> {
        let mut buf = [0u8; PAGE_SIZE];

        self.file.seek(SeekFrom::Start(page_id.byte_offset()))?;
        self.file.read_exact(&mut buf)?;

        Page::from_bytes(page_id, &buf)
    }

    /// Reads raw bytes from a page without validation.
    ///
    /// Used for the superblock, which has a custom format.
    pub fn read_raw(&mut self, page_id: PageId) -> Result<[u8; PAGE_SIZE], StoreError> {
        let mut buf = [0u8; PAGE_SIZE];

        self.file.seek(SeekFrom::Start(page_id.byte_offset()))?;
        self.file.read_exact(&mut buf)?;

        Ok(buf)
    }

    /// Inserts a page into the cache, evicting if necessary.
    fn insert_page(&mut self, page: Page) -> Result<(), StoreError> {
        let page_id = page.id;

        if self.pages.len() >= self.capacity {
            self.evict_one()?;
        }

        self.pages.insert(page_id, page);
        self.add_to_lru(page_id);

        Ok(())
    }

    /// Replaces a page that may or may not already be cached.
    fn replace_page(&mut self, page: Page) -> Result<(), StoreError> {
        let page_id = page.id;
        if self.pages.contains_key(&page_id) {
            self.pages.insert(page_id, page);
            self.touch(page_id);
            Ok(())
        } else {
            self.insert_page(page)
        }
    }

    /// Moves a page to the front of the LRU list.
    fn touch(&mut self, page_id: PageId) {
        if self.lru_head == Some(page_id) {
            return;
        }

        self.remove_from_lru(page_id);
        self.add_to_lru(page_id);
    }

    fn add_to_lru(&mut self, page_id: PageId) {
        let node = LruNode {
            prev: None,
            next: self.lru_head,
        };

        if let Some(old_head) = self.lru_head {
            if let Some(head_node) = self.lru.get_mut(&old_head) {
                head_node.prev = Some(page_id);
            }
        }

        self.lru.insert(page_id, node);
        self.lru_head = Some(page_id);

        if self.lru_tail.is_none() {
            self.lru_tail = Some(page_id);
        }
    }

    fn remove_from_lru(&mut self, page_id: PageId) {
        let Some(node) = self.lru.remove(&page_id) else {
            return;
        };

        if let Some(prev_id) = node.prev {
            if let Some(prev_node) = self.lru.get_mut(&prev_id) {
                prev_node.next = node.next;
            }
        } else {
            self.lru_head = node.next;
        }

        if let Some(next_id) = node.next {
            if let Some(next_node) = self.lru.get_mut(&next_id) {
                next_node.prev = node.prev;
            }
        } else {
            self.lru_tail = node.prev;
        }
    }

    /// Evicts the least recently used page, writing it back if dirty.
    fn evict_one(&mut self) -> Result<(), StoreError> {
        let Some(page_id) = self.lru_tail else {
            return Ok(());
        };

        if let Some(page) = self.pages.get_mut(&page_id) {
            if page.is_dirty() {
                self.file.seek(SeekFrom::Start(page.id.byte_offset()))?;
                self.file.write_all(page.as_bytes())?;
            }
        }

        self.pages.remove(&page_id);
        self.remove_from_lru(page_id);

        Ok(())
    }

    /// Syncs all dirty pages to disk.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        for page in self.pages.values_mut() {
            if page.is_dirty() {
                let page_offset = page.id.byte_offset();
                let bytes = page.as_bytes();

                self.file.seek(SeekFrom::Start(page_offset))?;
                self.file.write_all(bytes)?;

                page.mark_clean();
            }
        }

        self.file.sync_all()?;

        Ok(())
    }

    /// Returns the number of pages currently cached.
    #[cfg(test)]
    pub fn cached_count(&self) -> usize {
        self.pages.len()
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("cached", &self.pages.len())
            .field("capacity", &self.capacity)
            .field("next_page_id", &self.next_page_id)
            .field("free_head", &self.free_head)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod cache_tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocate_and_get() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let mut cache = PageCache::open(&path, Some(10)).unwrap();

        let page_id = cache.allocate(PageType::Leaf).unwrap();
        assert_eq!(page_id, PageId::new(0));

        let page = cache.get(page_id).unwrap().unwrap();
        assert_eq!(page.page_type(), PageType::Leaf);
        assert_eq!(page.item_count(), 0);
    }

    #[test]
    fn sync_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut cache = PageCache::open(&path, Some(10)).unwrap();
            let page_id = cache.allocate(PageType::Leaf).unwrap();

            let page = cache.get_mut(page_id).unwrap().unwrap();
            page.insert_item(0, b"test data").unwrap();

            cache.sync().unwrap();
        }

        {
            let mut cache = PageCache::open(&path, Some(10)).unwrap();
            let page = cache.get(PageId::new(0)).unwrap().unwrap();
            assert_eq!(page.get_item(0), b"test data");
        }
    }

    #[test]
    fn lru_eviction_keeps_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let mut cache = PageCache::open(&path, Some(3)).unwrap();

        let _p0 = cache.allocate(PageType::Leaf).unwrap();
        let _p1 = cache.allocate(PageType::Leaf).unwrap();
        let _p2 = cache.allocate(PageType::Leaf).unwrap();

        assert_eq!(cache.cached_count(), 3);

        let _p3 = cache.allocate(PageType::Leaf).unwrap();

        assert_eq!(cache.cached_count(), 3);
    }

    #[test]
    fn freed_pages_are_recycled_lifo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let mut cache = PageCache::open(&path, Some(10)).unwrap();

        let a = cache.allocate(PageType::Blob).unwrap();
        let b = cache.allocate(PageType::Blob).unwrap();
        cache.free(a).unwrap();
        cache.free(b).unwrap();

        // Most recently freed comes back first.
        assert_eq!(cache.allocate(PageType::Leaf).unwrap(), b);
        assert_eq!(cache.allocate(PageType::Leaf).unwrap(), a);

        // Free list exhausted: fresh page.
        let c = cache.allocate(PageType::Leaf).unwrap();
        assert_eq!(c, PageId::new(2));
    }

    #[test]
    fn free_head_survives_via_set() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut cache = PageCache::open(&path, Some(10)).unwrap();
            let a = cache.allocate(PageType::Blob).unwrap();
            cache.free(a).unwrap();
            assert_eq!(cache.free_head(), Some(a));
            cache.sync().unwrap();
        }

        {
            let mut cache = PageCache::open(&path, Some(10)).unwrap();
            // The store restores the head from the superblock.
            cache.set_free_head(Some(PageId::new(0)));
            assert_eq!(cache.allocate(PageType::Leaf).unwrap(), PageId::new(0));
        }
    }
}
