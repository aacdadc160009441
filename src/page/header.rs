//! Node page header.
//!
//! The header occupies the first bytes of each B-tree page.

use crate::types::{PageId, PageType, PAGE_SIZE};

/// Size of the header for leaf pages
pub const LEAF_HEADER_SIZE: usize = 8;

/// Size of the header for interior pages (adds the leftmost child pointer)
pub const INTERIOR_HEADER_SIZE: usize = 12;

/// Node page header
///
/// Layout:
/// ```text
/// Offset  Size  Description
/// 0       1     Page type flag
/// 1       2     Number of cells on this page
/// 3       2     Offset to start of cell content area
/// 5       3     Reserved
/// 8       4     Leftmost child page (interior pages only)
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    /// Leaf or interior
    pub page_type: PageType,
    /// Number of cells on this page
    pub cell_count: u16,
    /// Offset to the start of the cell content area
    pub cell_content_start: u16,
    /// Child holding keys below the first separator (interior pages only)
    pub leftmost_child: PageId,
}

impl PageHeader {
    /// Create a new page header for a leaf page
    pub fn new_leaf() -> Self {
        Self::empty(PageType::Leaf, PageId::NONE)
    }

    /// Create a new page header for an interior page
    pub fn new_interior(leftmost_child: PageId) -> Self {
        Self::empty(PageType::Interior, leftmost_child)
    }

    fn empty(page_type: PageType, leftmost_child: PageId) -> Self {
        Self {
            page_type,
            cell_count: 0,
            cell_content_start: PAGE_SIZE as u16,
            leftmost_child,
        }
    }

    /// Size of the header for a given page type
    pub fn size_for(page_type: PageType) -> usize {
        if page_type.is_interior() {
            INTERIOR_HEADER_SIZE
        } else {
            LEAF_HEADER_SIZE
        }
    }

    /// Get the size of this header in bytes
    pub fn size(&self) -> usize {
        Self::size_for(self.page_type)
    }

    /// Read a page header from bytes
    pub fn read(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < LEAF_HEADER_SIZE {
            return None;
        }

        let page_type = PageType::from_byte(bytes[0]).filter(|t| t.is_node())?;
        let cell_count = u16::from_be_bytes([bytes[1], bytes[2]]);
        let cell_content_start = u16::from_be_bytes([bytes[3], bytes[4]]);

        let leftmost_child = if page_type.is_interior() {
            if bytes.len() < INTERIOR_HEADER_SIZE {
                return None;
            }
            PageId::from_be_slice(&bytes[8..12])
        } else {
            PageId::NONE
        };

        Some(Self {
            page_type,
            cell_count,
            cell_content_start,
            leftmost_child,
        })
    }

    /// Write this header to bytes
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0] = self.page_type as u8;
        bytes[1..3].copy_from_slice(&self.cell_count.to_be_bytes());
        bytes[3..5].copy_from_slice(&self.cell_content_start.to_be_bytes());
        bytes[5..8].fill(0);

        if self.page_type.is_interior() {
            bytes[8..12].copy_from_slice(&self.leftmost_child.to_be_bytes());
        }
    }

    /// Offset where the cell pointer array starts
    pub fn cell_pointer_offset(&self) -> usize {
        self.size()
    }

    /// End of the cell pointer array
    pub fn cell_pointer_array_end(&self) -> usize {
        self.cell_pointer_offset() + (self.cell_count as usize * 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_header_roundtrip() {
        let header = PageHeader {
            page_type: PageType::Leaf,
            cell_count: 5,
            cell_content_start: 3500,
            leftmost_child: PageId::NONE,
        };

        let mut bytes = [0u8; LEAF_HEADER_SIZE];
        header.write(&mut bytes);

        let read_header = PageHeader::read(&bytes).unwrap();
        assert_eq!(read_header.page_type, PageType::Leaf);
        assert_eq!(read_header.cell_count, 5);
        assert_eq!(read_header.cell_content_start, 3500);
    }

    #[test]
    fn test_interior_header() {
        let header = PageHeader::new_interior(PageId::new(42));

        let mut bytes = [0u8; INTERIOR_HEADER_SIZE];
        header.write(&mut bytes);

        let read_header = PageHeader::read(&bytes).unwrap();
        assert_eq!(read_header.page_type, PageType::Interior);
        assert_eq!(read_header.leftmost_child, PageId::new(42));
    }

    #[test]
    fn test_rejects_non_node_pages() {
        let mut bytes = [0u8; INTERIOR_HEADER_SIZE];
        bytes[0] = PageType::Overflow as u8;
        assert!(PageHeader::read(&bytes).is_none());
    }
}
