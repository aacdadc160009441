//! Slotted page implementation.
//!
//! A slotted page uses the following layout:
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                    Page Header                      │
//! ├────────────────────────────────────────────────────┤
//! │                 Cell Pointer Array                  │
//! │  [ptr0][ptr1][ptr2]...      →                      │
//! ├────────────────────────────────────────────────────┤
//! │                   Free Space                        │
//! ├────────────────────────────────────────────────────┤
//! │                 Cell Content Area                   │
//! │      ←  [cell2][cell1][cell0]                      │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! Cell pointers are sorted by key order for binary search. Committed pages
//! are never edited in place: a writer builds a fresh page from cells and
//! writes it to a new location.

use crate::error::{Result, StorageError};
use crate::page::{Cell, PageBuf, PageHeader};
use crate::types::{PageId, PageType, PAGE_SIZE};
use std::cmp::Ordering;

/// A slotted page holding one B-tree node
#[derive(Clone)]
pub struct SlottedPage {
    /// The raw page data
    data: PageBuf,
    /// Cached header (kept in sync with data)
    header: PageHeader,
}

impl SlottedPage {
    /// Create a new empty leaf page
    pub fn new_leaf() -> Self {
        Self::with_header(PageHeader::new_leaf())
    }

    /// Create a new empty interior page
    pub fn new_interior(leftmost_child: PageId) -> Self {
        Self::with_header(PageHeader::new_interior(leftmost_child))
    }

    fn with_header(header: PageHeader) -> Self {
        let mut data = PageBuf::new();
        header.write(&mut data);
        Self { data, header }
    }

    /// Build a page from cells that are already in ascending key order
    pub fn build(page_type: PageType, leftmost_child: PageId, cells: &[Cell]) -> Result<Self> {
        let mut page = match page_type {
            PageType::Leaf => Self::new_leaf(),
            PageType::Interior => Self::new_interior(leftmost_child),
            other => {
                return Err(StorageError::invalid_operation(format!(
                    "cannot build a node page of type {:?}",
                    other
                )))
            }
        };
        for cell in cells {
            page.append_cell(cell)?;
        }
        Ok(page)
    }

    /// Bytes available for cells and their pointers on an empty page
    pub fn capacity(page_type: PageType) -> usize {
        PAGE_SIZE - PageHeader::size_for(page_type)
    }

    /// Load a page from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let data = PageBuf::from_bytes(bytes);
        let header = PageHeader::read(&data)
            .ok_or_else(|| StorageError::invalid_page("invalid page header"))?;

        let content_start = header.cell_content_start as usize;
        if content_start > PAGE_SIZE || content_start < header.cell_pointer_array_end() {
            return Err(StorageError::invalid_page(format!(
                "cell area starts at {} with {} cells",
                content_start, header.cell_count
            )));
        }

        Ok(Self { data, header })
    }

    /// Get the raw bytes of this page
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Get the page header
    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    /// Get the number of cells in this page
    pub fn cell_count(&self) -> usize {
        self.header.cell_count as usize
    }

    /// Check if this is a leaf page
    pub fn is_leaf(&self) -> bool {
        self.header.page_type.is_leaf()
    }

    /// Check if this is an interior page
    pub fn is_interior(&self) -> bool {
        self.header.page_type.is_interior()
    }

    /// Get the page type
    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    /// Child holding keys below the first separator (interior pages)
    pub fn leftmost_child(&self) -> PageId {
        self.header.leftmost_child
    }

    fn cell_pointer(&self, index: usize) -> usize {
        let offset = self.header.cell_pointer_offset() + index * 2;
        u16::from_be_bytes([self.data[offset], self.data[offset + 1]]) as usize
    }

    fn set_cell_pointer(&mut self, index: usize, pointer: u16) {
        let offset = self.header.cell_pointer_offset() + index * 2;
        self.data[offset..offset + 2].copy_from_slice(&pointer.to_be_bytes());
    }

    /// Get the cell at the given index
    pub fn get_cell(&self, index: usize) -> Result<Cell> {
        if index >= self.cell_count() {
            return Err(StorageError::invalid_operation(format!(
                "cell index {} out of bounds (count: {})",
                index,
                self.cell_count()
            )));
        }

        let pointer = self.cell_pointer(index);
        if pointer < self.header.cell_content_start as usize || pointer >= PAGE_SIZE {
            return Err(StorageError::corruption(format!(
                "cell pointer {} outside content area",
                pointer
            )));
        }

        let cell_bytes = &self.data[pointer..];
        let cell = if self.is_leaf() {
            Cell::decode_leaf(cell_bytes)
        } else {
            Cell::decode_interior(cell_bytes)
        };

        cell.ok_or_else(|| StorageError::corruption(format!("failed to decode cell {}", index)))
    }

    /// Get all cells in this page (in sorted key order)
    pub fn cells(&self) -> Result<Vec<Cell>> {
        (0..self.cell_count()).map(|i| self.get_cell(i)).collect()
    }

    /// Free space between the pointer array and the cell content area,
    /// minus the 2 bytes a new cell pointer needs
    pub fn free_space(&self) -> usize {
        let ptr_array_end = self.header.cell_pointer_array_end();
        let content_start = self.header.cell_content_start as usize;
        content_start.saturating_sub(ptr_array_end).saturating_sub(2)
    }

    /// Bytes in use: header, pointers and cell content
    pub fn used_space(&self) -> usize {
        PAGE_SIZE - (self.header.cell_content_start as usize - self.header.cell_pointer_array_end())
    }

    /// Check if a cell of the given size can fit
    pub fn can_fit(&self, cell_size: usize) -> bool {
        self.free_space() >= cell_size
    }

    /// Insert a cell at its sorted position
    ///
    /// Returns the index where the cell was inserted.
    pub fn insert_cell(&mut self, cell: &Cell) -> Result<usize> {
        let insert_pos = match self.search(&cell.key)? {
            Ok(_) => {
                return Err(StorageError::invalid_operation(
                    "duplicate key inserted into page",
                ))
            }
            Err(pos) => pos,
        };

        self.place_cell(insert_pos, cell)?;
        Ok(insert_pos)
    }

    /// Append a cell whose key sorts after every existing key
    fn append_cell(&mut self, cell: &Cell) -> Result<()> {
        if let Some(last) = self.cell_count().checked_sub(1) {
            if self.get_cell(last)?.key.as_slice() >= cell.key.as_slice() {
                return Err(StorageError::invalid_operation("cells out of key order"));
            }
        }
        self.place_cell(self.cell_count(), cell)
    }

    fn place_cell(&mut self, insert_pos: usize, cell: &Cell) -> Result<()> {
        let encoded = cell.encode();
        let cell_size = encoded.len();

        if !self.can_fit(cell_size) {
            return Err(StorageError::PageFull {
                needed: cell_size + 2,
                available: self.free_space(),
            });
        }

        let new_content_start = self.header.cell_content_start as usize - cell_size;
        self.data[new_content_start..new_content_start + cell_size].copy_from_slice(&encoded);

        for i in (insert_pos..self.cell_count()).rev() {
            let ptr = self.cell_pointer(i) as u16;
            self.set_cell_pointer(i + 1, ptr);
        }
        self.set_cell_pointer(insert_pos, new_content_start as u16);

        self.header.cell_count += 1;
        self.header.cell_content_start = new_content_start as u16;
        self.header.write(&mut self.data);

        Ok(())
    }

    /// Binary search for a key.
    ///
    /// `Ok(index)` when present, `Err(index)` with the insertion point
    /// otherwise.
    pub fn search(&self, key: &[u8]) -> Result<std::result::Result<usize, usize>> {
        let mut low = 0;
        let mut high = self.cell_count();

        while low < high {
            let mid = low + (high - low) / 2;
            let cell = self.get_cell(mid)?;

            match key.cmp(&cell.key) {
                Ordering::Less => high = mid,
                Ordering::Greater => low = mid + 1,
                Ordering::Equal => return Ok(Ok(mid)),
            }
        }

        Ok(Err(low))
    }

    /// Child slot that covers `key` (interior pages).
    ///
    /// Slot 0 is the leftmost child (keys < first separator); slot `i`
    /// is the child of cell `i - 1` (keys >= that separator and below the
    /// next one).
    ///
    /// Example with separators [10, 20, 30]:
    /// - slot 0 → keys < 10
    /// - slot 1 → keys >= 10 and < 20
    /// - slot 3 → keys >= 30
    pub fn child_slot(&self, key: &[u8]) -> Result<usize> {
        if !self.is_interior() {
            return Err(StorageError::invalid_operation(
                "child_slot called on leaf page",
            ));
        }

        Ok(match self.search(key)? {
            Ok(index) => index + 1,
            Err(index) => index,
        })
    }

    /// Child page at a slot (see [`child_slot`](Self::child_slot))
    pub fn child_at(&self, slot: usize) -> Result<PageId> {
        if !self.is_interior() {
            return Err(StorageError::invalid_operation(
                "child_at called on leaf page",
            ));
        }
        if slot == 0 {
            Ok(self.leftmost_child())
        } else {
            Ok(self.get_cell(slot - 1)?.child)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_leaf_page() {
        let page = SlottedPage::new_leaf();
        assert!(page.is_leaf());
        assert!(!page.is_interior());
        assert_eq!(page.cell_count(), 0);
        assert_eq!(page.used_space(), crate::page::LEAF_HEADER_SIZE);
    }

    #[test]
    fn test_insert_and_get() {
        let mut page = SlottedPage::new_leaf();

        page.insert_cell(&Cell::new_leaf(b"banana".to_vec(), b"yellow".to_vec())).unwrap();
        page.insert_cell(&Cell::new_leaf(b"apple".to_vec(), b"red".to_vec())).unwrap();
        page.insert_cell(&Cell::new_leaf(b"cherry".to_vec(), b"red".to_vec())).unwrap();

        let keys: Vec<Vec<u8>> = page.cells().unwrap().into_iter().map(|c| c.key).collect();
        assert_eq!(keys, vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut page = SlottedPage::new_leaf();
        page.insert_cell(&Cell::new_leaf(b"a".to_vec(), b"1".to_vec())).unwrap();
        assert!(page.insert_cell(&Cell::new_leaf(b"a".to_vec(), b"2".to_vec())).is_err());
    }

    #[test]
    fn test_search() {
        let cells = vec![
            Cell::new_leaf(b"a".to_vec(), b"1".to_vec()),
            Cell::new_leaf(b"c".to_vec(), b"3".to_vec()),
        ];
        let page = SlottedPage::build(PageType::Leaf, PageId::NONE, &cells).unwrap();

        assert_eq!(page.search(b"a").unwrap(), Ok(0));
        assert_eq!(page.search(b"b").unwrap(), Err(1));
        assert_eq!(page.search(b"c").unwrap(), Ok(1));
        assert_eq!(page.search(b"d").unwrap(), Err(2));
    }

    #[test]
    fn test_build_rejects_unsorted_cells() {
        let cells = vec![
            Cell::new_leaf(b"b".to_vec(), Vec::new()),
            Cell::new_leaf(b"a".to_vec(), Vec::new()),
        ];
        assert!(SlottedPage::build(PageType::Leaf, PageId::NONE, &cells).is_err());
    }

    #[test]
    fn test_page_full() {
        let mut page = SlottedPage::new_leaf();
        let mut i = 0u32;
        let err = loop {
            let cell = Cell::new_leaf(i.to_be_bytes().to_vec(), vec![0u8; 200]);
            if let Err(e) = page.insert_cell(&cell) {
                break e;
            }
            i += 1;
        };
        assert!(matches!(err, StorageError::PageFull { .. }));
        assert!(i > 10);
    }

    #[test]
    fn test_interior_child_slots() {
        let cells = vec![
            Cell::new_interior(b"m".to_vec(), PageId::new(10)),
            Cell::new_interior(b"t".to_vec(), PageId::new(20)),
        ];
        let page = SlottedPage::build(PageType::Interior, PageId::new(100), &cells).unwrap();

        assert_eq!(page.child_slot(b"a").unwrap(), 0);
        assert_eq!(page.child_at(0).unwrap(), PageId::new(100));
        assert_eq!(page.child_slot(b"m").unwrap(), 1);
        assert_eq!(page.child_slot(b"n").unwrap(), 1);
        assert_eq!(page.child_at(1).unwrap(), PageId::new(10));
        assert_eq!(page.child_slot(b"t").unwrap(), 2);
        assert_eq!(page.child_slot(b"z").unwrap(), 2);
        assert_eq!(page.child_at(2).unwrap(), PageId::new(20));
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let cells = vec![Cell::new_leaf(b"test".to_vec(), b"data".to_vec())];
        let page = SlottedPage::build(PageType::Leaf, PageId::NONE, &cells).unwrap();

        let restored = SlottedPage::from_bytes(page.as_bytes()).unwrap();
        assert_eq!(restored.cells().unwrap(), cells);
        assert_eq!(restored.used_space(), page.used_space());
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let mut bytes = vec![0u8; PAGE_SIZE];
        bytes[0] = PageType::Leaf as u8;
        bytes[1..3].copy_from_slice(&3000u16.to_be_bytes());
        bytes[3..5].copy_from_slice(&100u16.to_be_bytes());
        assert!(SlottedPage::from_bytes(&bytes).is_err());
    }
}
