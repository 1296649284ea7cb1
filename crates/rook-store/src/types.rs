//! Core types for the page store.

use std::fmt::{self, Debug, Display};

use bytes::Bytes;

// ============================================================================
// Constants
// ============================================================================

/// Page size in bytes (4KB).
///
/// This is the fundamental unit of I/O and storage. All pages are exactly
/// this size, enabling page-aligned I/O and simple free space management.
pub const PAGE_SIZE: usize = 4096;

/// Maximum key length in bytes.
///
/// Keys must fit in a single page along with their value and overhead.
/// This limit also bounds the padding used by [`Key::decrement`].
pub const MAX_KEY_LENGTH: usize = 1024;

/// Maximum length of an inline leaf value.
///
/// Leaf values are blob references; a reference never exceeds this many
/// bytes regardless of how large the referenced payload is.
pub const MAX_INLINE_VALUE: usize = 251;

/// Page header size in bytes.
pub const PAGE_HEADER_SIZE: usize = 32;

/// CRC32 checksum size in bytes.
pub const CRC_SIZE: usize = 4;

// ============================================================================
// Page ID
// ============================================================================

/// Unique identifier for a page within the store.
///
/// Page 0 is always the superblock. Page IDs are assigned sequentially as
/// new pages are allocated; freed pages are recycled through the free list.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PageId(u64);

impl PageId {
    /// The superblock page (always page 0).
    pub const SUPERBLOCK: PageId = PageId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the byte offset of this page in the file.
    pub fn byte_offset(self) -> u64 {
        self.0 * PAGE_SIZE as u64
    }

    /// Returns the next page ID.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

impl Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tree ID
// ============================================================================

/// Unique identifier for a B-tree within the store.
///
/// The primary tree of a table and each of its secondary-index trees are
/// separate `TreeId` entries in the superblock's tree table.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub struct TreeId(u64);

impl TreeId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Debug for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeId({})", self.0)
    }
}

impl Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Key
// ============================================================================

/// A key in the store.
///
/// Keys are arbitrary byte sequences up to [`MAX_KEY_LENGTH`] bytes,
/// compared lexicographically for B-tree ordering.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(Bytes);

impl Key {
    /// Creates a new key from bytes.
    ///
    /// # Panics
    ///
    /// Debug builds panic if the key exceeds [`MAX_KEY_LENGTH`].
    pub fn new(data: impl Into<Bytes>) -> Self {
        let bytes = data.into();
        debug_assert!(
            bytes.len() <= MAX_KEY_LENGTH,
            "key length {} exceeds maximum {}",
            bytes.len(),
            MAX_KEY_LENGTH
        );
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// The minimum possible key (empty).
    pub fn min() -> Self {
        Self(Bytes::new())
    }

    /// Returns the smallest key strictly greater than `self`.
    pub fn successor(&self) -> Self {
        let mut data = Vec::with_capacity(self.0.len() + 1);
        data.extend_from_slice(&self.0);
        data.push(0x00);
        Self(Bytes::from(data))
    }

    /// Returns the largest key strictly smaller than `self`, or `None` for
    /// the empty key, which has no predecessor.
    ///
    /// Used to turn half-open bounds into (exclusive, inclusive) ones: the
    /// predecessor of a key `k` is the key `p` such that `x < k` iff
    /// `x <= p` for every key `x` of at most [`MAX_KEY_LENGTH`] bytes.
    pub fn decrement(&self) -> Option<Self> {
        let bytes = self.as_bytes();
        let last = *bytes.last()?;
        if last == 0x00 {
            // "a\0" -> "a": nothing sorts in between.
            Some(Self(Bytes::copy_from_slice(&bytes[..bytes.len() - 1])))
        } else {
            // "b" -> "a" padded with 0xFF up to the maximum key length.
            let mut data = Vec::with_capacity(MAX_KEY_LENGTH);
            data.extend_from_slice(bytes);
            *data.last_mut().expect("non-empty checked above") = last - 1;
            data.resize(MAX_KEY_LENGTH, 0xFF);
            Some(Self(Bytes::from(data)))
        }
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Show first 16 bytes in hex for debugging
        write!(f, "Key(")?;
        for (i, byte) in self.0.iter().take(16).enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        if self.0.len() > 16 {
            write!(f, "...+{} more", self.0.len() - 16)?;
        }
        write!(f, ")")
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Try to display as UTF-8 if printable, otherwise hex
        if let Ok(s) = std::str::from_utf8(&self.0) {
            if s.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
                return write!(f, "{s}");
            }
        }
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<&[u8]> for Key {
    fn from(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }
}

impl From<Vec<u8>> for Key {
    fn from(data: Vec<u8>) -> Self {
        Self::new(Bytes::from(data))
    }
}

impl From<Bytes> for Key {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::new(Bytes::from(s))
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// ============================================================================
// Key Range
// ============================================================================

/// A half-open key range `[left, right)`; `right = None` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub left: Key,
    pub right: Option<Key>,
}

impl KeyRange {
    pub fn new(left: Key, right: Option<Key>) -> Self {
        Self { left, right }
    }

    /// The range covering every key.
    pub fn all() -> Self {
        Self {
            left: Key::min(),
            right: None,
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        if *key < self.left {
            return false;
        }
        match &self.right {
            Some(right) => key < right,
            None => true,
        }
    }

    /// Returns true if every key of `other` is also in `self`.
    pub fn is_superset(&self, other: &KeyRange) -> bool {
        if other.left < self.left {
            return false;
        }
        match (&self.right, &other.right) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(ours), Some(theirs)) => theirs <= ours,
        }
    }
}
