//! Blob storage: variable-length payloads referenced from leaf values.
//!
//! A leaf value *is* a blob reference. Small payloads are embedded in the
//! reference itself; larger ones live in a chain of [`PageType::Blob`]
//! pages that the reference points at. The reference owns the chain:
//! clearing it returns every chain page to the free list.
//!
//! # Reference Encodings
//!
//! ```text
//! inline:  [0x00][payload_len: u16 LE][payload]          (<= 251 bytes total)
//! chained: [0x01][total_len: u64 LE][first_page: u64 LE] (17 bytes)
//! ```
//!
//! # Blob Page Layout
//!
//! Item 0 is the next page in the chain (`u64`, MAX terminates); item 1 is
//! this page's payload chunk.

use bytes::Bytes;

use crate::cache::PageCache;
use crate::error::StoreError;
use crate::page::{PageType, SLOT_SIZE};
use crate::types::{CRC_SIZE, MAX_INLINE_VALUE, PAGE_HEADER_SIZE, PAGE_SIZE, PageId};

/// Encoding tag for payloads embedded in the reference.
const TAG_INLINE: u8 = 0x00;

/// Encoding tag for payloads stored in a page chain.
const TAG_CHAINED: u8 = 0x01;

/// Largest payload that stays inline in the reference.
pub const INLINE_PAYLOAD_MAX: usize = MAX_INLINE_VALUE - 3;

/// Size of a chained reference.
const CHAINED_REF_LEN: usize = 1 + 8 + 8;

/// Payload bytes per blob page: everything left after the header, the CRC
/// trailer, two slots, and the chain link.
pub const BLOB_CHUNK: usize = PAGE_SIZE - PAGE_HEADER_SIZE - CRC_SIZE - 2 * SLOT_SIZE - 8;

/// Chain terminator.
const CHAIN_END: u64 = u64::MAX;

// ============================================================================
// Blob Reference
// ============================================================================

/// A validated blob reference, as stored inline in a B-tree leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef(Bytes);

enum Parsed<'a> {
    Inline(&'a [u8]),
    Chained { total: u64, first: PageId },
}

impl BlobRef {
    /// Validates raw leaf-value bytes as a blob reference.
    pub fn from_leaf_bytes(bytes: Bytes) -> Result<Self, StoreError> {
        let r = Self(bytes);
        r.parse()?;
        Ok(r)
    }

    /// Returns the raw reference bytes for storing in a leaf.
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    /// Returns the length in bytes the reference occupies in the leaf.
    pub fn inline_size(&self) -> usize {
        self.0.len()
    }

    /// Returns the length of the referenced payload.
    pub fn payload_len(&self) -> Result<u64, StoreError> {
        Ok(match self.parse()? {
            Parsed::Inline(data) => data.len() as u64,
            Parsed::Chained { total, .. } => total,
        })
    }

    fn parse(&self) -> Result<Parsed<'_>, StoreError> {
        let bytes = &self.0;
        if bytes.len() > MAX_INLINE_VALUE {
            return Err(StoreError::BlobCorrupted(format!(
                "reference of {} bytes exceeds maximum {}",
                bytes.len(),
                MAX_INLINE_VALUE
            )));
        }
        match bytes.first() {
            Some(&TAG_INLINE) => {
                if bytes.len() < 3 {
                    return Err(StoreError::BlobCorrupted(
                        "inline reference truncated".into(),
                    ));
                }
                let len = u16::from_le_bytes(bytes[1..3].try_into().unwrap()) as usize;
                if bytes.len() != 3 + len {
                    return Err(StoreError::BlobCorrupted(format!(
                        "inline reference length mismatch: header says {len}, have {}",
                        bytes.len() - 3
                    )));
                }
                Ok(Parsed::Inline(&bytes[3..]))
            }
            Some(&TAG_CHAINED) => {
                if bytes.len() != CHAINED_REF_LEN {
                    return Err(StoreError::BlobCorrupted(
                        "chained reference has wrong length".into(),
                    ));
                }
                let total = u64::from_le_bytes(bytes[1..9].try_into().unwrap());
                let first = PageId::new(u64::from_le_bytes(bytes[9..17].try_into().unwrap()));
                Ok(Parsed::Chained { total, first })
            }
            Some(&tag) => Err(StoreError::BlobCorrupted(format!(
                "unknown blob reference tag {tag:#04x}"
            ))),
            None => Err(StoreError::BlobCorrupted("empty blob reference".into())),
        }
    }
}

// ============================================================================
// Blob Operations
// ============================================================================

/// Writes a payload, returning a fresh reference to it.
pub fn create(cache: &mut PageCache, data: &[u8]) -> Result<BlobRef, StoreError> {
    if data.len() <= INLINE_PAYLOAD_MAX {
        let mut buf = Vec::with_capacity(3 + data.len());
        buf.push(TAG_INLINE);
        buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
        buf.extend_from_slice(data);
        return Ok(BlobRef(Bytes::from(buf)));
    }

    // Chain: allocate pages up front so each can link to its successor.
    let chunk_count = data.len().div_ceil(BLOB_CHUNK);
    let mut page_ids = Vec::with_capacity(chunk_count);
    for _ in 0..chunk_count {
        page_ids.push(cache.allocate(PageType::Blob)?);
    }

    for (i, chunk) in data.chunks(BLOB_CHUNK).enumerate() {
        let next = page_ids
            .get(i + 1)
            .map_or(CHAIN_END, |id| id.as_u64());
        let page_id = page_ids[i];
        let page = cache
            .get_mut(page_id)?
            .ok_or(StoreError::PageNotFound(page_id))?;
        page.insert_item(0, &next.to_le_bytes())?;
        page.insert_item(1, chunk)?;
    }

    let mut buf = Vec::with_capacity(CHAINED_REF_LEN);
    buf.push(TAG_CHAINED);
    buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
    buf.extend_from_slice(&page_ids[0].as_u64().to_le_bytes());
    Ok(BlobRef(Bytes::from(buf)))
}

/// Reads the payload a reference points at.
pub fn read(cache: &mut PageCache, blob: &BlobRef) -> Result<Bytes, StoreError> {
    match blob.parse()? {
        Parsed::Inline(data) => Ok(Bytes::copy_from_slice(data)),
        Parsed::Chained { total, first } => {
            let mut out = Vec::with_capacity(total as usize);
            walk_chain(cache, total, first, |chunk| {
                out.extend_from_slice(chunk);
            })?;
            Ok(Bytes::from(out))
        }
    }
}

/// Releases the payload a reference points at. The reference must not be
/// used afterwards.
pub fn clear(cache: &mut PageCache, blob: &BlobRef) -> Result<(), StoreError> {
    match blob.parse()? {
        Parsed::Inline(_) => Ok(()),
        Parsed::Chained { total, first } => {
            // Collect the chain before freeing: freeing overwrites links.
            let mut ids = Vec::new();
            let mut next = first;
            let mut remaining = total;
            loop {
                ids.push(next);
                let (link, chunk_len) = read_chain_page(cache, next)?;
                remaining = remaining.saturating_sub(chunk_len as u64);
                match link {
                    Some(id) => next = id,
                    None => break,
                }
                if ids.len() > chain_page_bound(total) {
                    return Err(StoreError::BlobCorrupted("blob chain cycle".into()));
                }
            }
            if remaining != 0 {
                return Err(StoreError::BlobCorrupted(format!(
                    "blob chain short by {remaining} bytes"
                )));
            }
            for id in ids {
                cache.free(id)?;
            }
            Ok(())
        }
    }
}

/// Verifies that every page a reference depends on is fetchable and that
/// the chain's bookkeeping adds up.
pub fn fsck(cache: &mut PageCache, blob: &BlobRef) -> Result<(), StoreError> {
    match blob.parse()? {
        Parsed::Inline(_) => Ok(()),
        Parsed::Chained { total, first } => {
            let mut seen = 0u64;
            walk_chain(cache, total, first, |chunk| {
                seen += chunk.len() as u64;
            })?;
            debug_assert_eq!(seen, total, "walk_chain checked the total already");
            Ok(())
        }
    }
}

/// Walks a blob chain, handing each chunk to `visit`. Validates page
/// types, link structure, and the declared total length.
fn walk_chain(
    cache: &mut PageCache,
    total: u64,
    first: PageId,
    mut visit: impl FnMut(&[u8]),
) -> Result<(), StoreError> {
    let mut next = Some(first);
    let mut seen = 0u64;
    let mut pages = 0usize;

    while let Some(page_id) = next {
        pages += 1;
        if pages > chain_page_bound(total) {
            return Err(StoreError::BlobCorrupted("blob chain cycle".into()));
        }

        let page = cache
            .get(page_id)?
            .ok_or(StoreError::PageNotFound(page_id))?;
        if page.page_type() != PageType::Blob {
            return Err(StoreError::BlobCorrupted(format!(
                "chain page {page_id} has type {:?}",
                page.page_type()
            )));
        }
        if page.item_count() != 2 {
            return Err(StoreError::BlobCorrupted(format!(
                "chain page {page_id} has {} items, expected 2",
                page.item_count()
            )));
        }

        let link = page.get_item(0);
        if link.len() != 8 {
            return Err(StoreError::BlobCorrupted("malformed chain link".into()));
        }
        let link = u64::from_le_bytes(link.try_into().unwrap());

        let chunk = page.get_item(1);
        seen += chunk.len() as u64;
        if seen > total {
            return Err(StoreError::BlobCorrupted(format!(
                "blob chain longer than declared total {total}"
            )));
        }
        visit(chunk);

        next = if link == CHAIN_END {
            None
        } else {
            Some(PageId::new(link))
        };
    }

    if seen != total {
        return Err(StoreError::BlobCorrupted(format!(
            "blob chain holds {seen} bytes, declared {total}"
        )));
    }
    Ok(())
}

fn read_chain_page(
    cache: &mut PageCache,
    page_id: PageId,
) -> Result<(Option<PageId>, usize), StoreError> {
    let page = cache
        .get(page_id)?
        .ok_or(StoreError::PageNotFound(page_id))?;
    if page.page_type() != PageType::Blob || page.item_count() != 2 {
        return Err(StoreError::BlobCorrupted(format!(
            "chain page {page_id} damaged"
        )));
    }
    let link = page.get_item(0);
    if link.len() != 8 {
        return Err(StoreError::BlobCorrupted("malformed chain link".into()));
    }
    let link = u64::from_le_bytes(link.try_into().unwrap());
    let chunk_len = page.get_item(1).len();
    let next = if link == CHAIN_END {
        None
    } else {
        Some(PageId::new(link))
    };
    Ok((next, chunk_len))
}

/// Upper bound on chain length for cycle detection.
fn chain_page_bound(total: u64) -> usize {
    (total as usize / BLOB_CHUNK) + 2
}
