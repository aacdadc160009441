//! Free list management.
//!
//! Pages released by a commit are *pending* until no open reader can still
//! reach them; only then do they join the reusable set. The whole list
//! (reusable and pending) is persisted as a chain of free-list pages at
//! every commit, since after a restart no reader survives.
//!
//! Free-list page layout:
//! ```text
//! Offset  Size  Description
//! 0       1     Page type (0x10)
//! 1       4     Next free-list page (0 at the end)
//! 5       2     Number of ids on this page
//! 7       4*n   Page ids
//! ```

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::types::{PageId, PageType, META_PAGE_COUNT, PAGE_SIZE};
use std::collections::{BTreeMap, BTreeSet};

const FREELIST_HEADER_SIZE: usize = 7;

/// Page ids that fit on one free-list page
pub const IDS_PER_PAGE: usize = (PAGE_SIZE - FREELIST_HEADER_SIZE) / 4;

/// Tracks reusable and pending pages
#[derive(Debug, Default, Clone)]
pub struct FreeList {
    /// Pages that can be handed out now
    free: BTreeSet<PageId>,
    /// Pages released by each commit, not yet safe to reuse
    pending: BTreeMap<u64, Vec<PageId>>,
}

impl FreeList {
    /// Create a new empty free list
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a free list whose pages are all reusable
    pub fn from_ids(ids: impl IntoIterator<Item = PageId>) -> Self {
        Self {
            free: ids.into_iter().collect(),
            pending: BTreeMap::new(),
        }
    }

    /// Take the lowest reusable page, if any
    pub fn allocate(&mut self) -> Option<PageId> {
        self.free.pop_first()
    }

    /// Return a page that no snapshot can see back to the reusable set
    pub fn push(&mut self, page_id: PageId) {
        self.free.insert(page_id);
    }

    /// Record a page released by transaction `txid`
    pub fn free(&mut self, txid: u64, page_id: PageId) {
        self.pending.entry(txid).or_default().push(page_id);
    }

    /// Make reusable every page released by a transaction `<= txid`.
    ///
    /// Returns the number of pages released.
    pub fn release(&mut self, txid: u64) -> usize {
        let still_pending = match txid.checked_add(1) {
            Some(next) => self.pending.split_off(&next),
            None => BTreeMap::new(),
        };
        let released = std::mem::replace(&mut self.pending, still_pending);

        let mut count = 0;
        for ids in released.into_values() {
            count += ids.len();
            self.free.extend(ids);
        }
        count
    }

    /// Number of reusable pages
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of pending pages
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Check if the free list is empty
    pub fn is_empty(&self) -> bool {
        self.free.is_empty() && self.pending.is_empty()
    }

    /// Every tracked page, reusable or pending, in ascending order
    pub fn all_ids(&self) -> Vec<PageId> {
        let mut ids: Vec<PageId> = self
            .free
            .iter()
            .copied()
            .chain(self.pending.values().flatten().copied())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of free-list pages needed to persist `count` ids
    pub fn pages_needed(count: usize) -> usize {
        count.div_ceil(IDS_PER_PAGE)
    }

    /// Encode ids into a chain of pages.
    ///
    /// `chain` holds the page ids the encoded pages will be written to,
    /// in order. It needs at least [`pages_needed`](Self::pages_needed)
    /// entries; pages past the last id are written empty.
    pub fn encode(ids: &[PageId], chain: &[PageId]) -> Vec<PageBuf> {
        debug_assert!(chain.len() >= Self::pages_needed(ids.len()));
        let mut chunks = ids.chunks(IDS_PER_PAGE);
        chain
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let chunk = chunks.next().unwrap_or(&[]);
                let next = chain.get(i + 1).copied().unwrap_or(PageId::NONE);
                let mut buf = PageBuf::new();
                buf[0] = PageType::FreeList as u8;
                buf[1..5].copy_from_slice(&next.to_be_bytes());
                buf[5..7].copy_from_slice(&(chunk.len() as u16).to_be_bytes());
                for (j, id) in chunk.iter().enumerate() {
                    let at = FREELIST_HEADER_SIZE + j * 4;
                    buf[at..at + 4].copy_from_slice(&id.to_be_bytes());
                }
                buf
            })
            .collect()
    }

    /// Decode one free-list page, returning its ids and the next page
    pub fn decode_page(
        page_id: PageId,
        buf: &PageBuf,
        page_count: u32,
    ) -> Result<(Vec<PageId>, PageId)> {
        if PageType::from_byte(buf[0]) != Some(PageType::FreeList) {
            return Err(StorageError::corruption(format!(
                "page {} is not a free-list page",
                page_id
            )));
        }
        let next = PageId::from_be_slice(&buf[1..5]);
        let count = u16::from_be_bytes([buf[5], buf[6]]) as usize;
        if count > IDS_PER_PAGE {
            return Err(StorageError::corruption(format!(
                "free-list page {} claims {} ids",
                page_id, count
            )));
        }

        let mut ids = Vec::with_capacity(count);
        for j in 0..count {
            let at = FREELIST_HEADER_SIZE + j * 4;
            let id = PageId::from_be_slice(&buf[at..at + 4]);
            if id.value() < META_PAGE_COUNT || id.value() >= page_count {
                return Err(StorageError::corruption(format!(
                    "free-list page {} lists out-of-range page {}",
                    page_id, id
                )));
            }
            ids.push(id);
        }
        Ok((ids, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freelist_operations() {
        let mut fl = FreeList::new();
        assert!(fl.is_empty());
        assert_eq!(fl.allocate(), None);

        fl.push(PageId::new(10));
        fl.push(PageId::new(5));
        assert_eq!(fl.free_count(), 2);

        assert_eq!(fl.allocate(), Some(PageId::new(5)));
        assert_eq!(fl.allocate(), Some(PageId::new(10)));
        assert_eq!(fl.allocate(), None);
    }

    #[test]
    fn test_pending_pages_wait_for_release() {
        let mut fl = FreeList::new();
        fl.free(3, PageId::new(7));
        fl.free(4, PageId::new(8));
        fl.free(4, PageId::new(9));

        assert_eq!(fl.allocate(), None);
        assert_eq!(fl.pending_count(), 3);

        assert_eq!(fl.release(3), 1);
        assert_eq!(fl.allocate(), Some(PageId::new(7)));
        assert_eq!(fl.allocate(), None);

        assert_eq!(fl.release(u64::MAX), 2);
        assert_eq!(fl.free_count(), 2);
        assert_eq!(fl.pending_count(), 0);
    }

    #[test]
    fn test_all_ids_includes_pending() {
        let mut fl = FreeList::from_ids([PageId::new(4)]);
        fl.free(9, PageId::new(2));
        assert_eq!(fl.all_ids(), vec![PageId::new(2), PageId::new(4)]);
    }

    #[test]
    fn test_encode_decode_chain() {
        let ids: Vec<PageId> = (2..2 + IDS_PER_PAGE as u32 + 5).map(PageId::new).collect();
        let chain = [PageId::new(5000), PageId::new(5001)];
        assert_eq!(FreeList::pages_needed(ids.len()), 2);

        let pages = FreeList::encode(&ids, &chain);
        let (first, next) = FreeList::decode_page(chain[0], &pages[0], 6000).unwrap();
        assert_eq!(next, chain[1]);
        let (second, end) = FreeList::decode_page(chain[1], &pages[1], 6000).unwrap();
        assert!(end.is_none());

        let decoded: Vec<PageId> = first.into_iter().chain(second).collect();
        assert_eq!(decoded, ids);
    }

    #[test]
    fn test_encode_pads_spare_chain_pages() {
        let chain = [PageId::new(20), PageId::new(21)];
        let pages = FreeList::encode(&[PageId::new(4)], &chain);
        assert_eq!(pages.len(), 2);

        let (ids, next) = FreeList::decode_page(chain[1], &pages[1], 30).unwrap();
        assert!(ids.is_empty());
        assert!(next.is_none());
    }

    #[test]
    fn test_decode_rejects_out_of_range_ids() {
        let pages = FreeList::encode(&[PageId::new(90)], &[PageId::new(3)]);
        assert!(FreeList::decode_page(PageId::new(3), &pages[0], 50).is_err());
    }
}
