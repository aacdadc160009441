//! Common types used throughout the storage engine.

mod page_id;
mod varint;

pub use page_id::PageId;
pub use varint::{decode_varint, encode_varint, put_varint, varint_size};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Number of meta pages at the start of the file (pages 0 and 1)
pub const META_PAGE_COUNT: u32 = 2;

/// Maximum key size.
///
/// Keeps every interior cell well under half a page so a two-way split
/// always produces nodes that fit.
pub const MAX_KEY_SIZE: usize = 512;

/// Values longer than this are moved to overflow pages.
pub const INLINE_VALUE_LIMIT: usize = 1024;

/// Default upper bound on a single value
pub const DEFAULT_MAX_VALUE_SIZE: usize = 64 * 1024 * 1024;

/// Nodes whose encoded size drops below this are rebalanced after a delete
pub const UNDERFLOW_THRESHOLD: usize = PAGE_SIZE / 4;

/// Page types, stored in the first byte of every non-meta page
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Free/unallocated page
    Free = 0x00,
    /// Meta page (commit marker)
    Meta = 0x01,
    /// Interior node (separator keys + child pointers)
    Interior = 0x02,
    /// Leaf node (keys + values)
    Leaf = 0x0D,
    /// Overflow page holding part of a large value
    Overflow = 0x0F,
    /// Free-list page
    FreeList = 0x10,
}

impl PageType {
    /// Check if this is a leaf page type
    pub fn is_leaf(self) -> bool {
        self == Self::Leaf
    }

    /// Check if this is an interior page type
    pub fn is_interior(self) -> bool {
        self == Self::Interior
    }

    /// Check if this page type holds a B-tree node
    pub fn is_node(self) -> bool {
        matches!(self, Self::Leaf | Self::Interior)
    }

    /// Convert from byte value
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Free),
            0x01 => Some(Self::Meta),
            0x02 => Some(Self::Interior),
            0x0D => Some(Self::Leaf),
            0x0F => Some(Self::Overflow),
            0x10 => Some(Self::FreeList),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_type_conversions() {
        assert!(PageType::Leaf.is_leaf());
        assert!(!PageType::Interior.is_leaf());
        assert!(PageType::Interior.is_interior());
        assert!(PageType::Leaf.is_node());
        assert!(!PageType::Overflow.is_node());

        assert_eq!(PageType::from_byte(0x0D), Some(PageType::Leaf));
        assert_eq!(PageType::from_byte(0x10), Some(PageType::FreeList));
        assert_eq!(PageType::from_byte(0xFF), None);
    }

    #[test]
    fn test_limits_allow_two_way_split() {
        // worst-case leaf cell: two 2-byte varints, flag, key, inline value, pointer
        let max_leaf_cell = 2 + 2 + 1 + MAX_KEY_SIZE + INLINE_VALUE_LIMIT + 2;
        assert!(max_leaf_cell * 2 <= PAGE_SIZE - 12);
    }
}
