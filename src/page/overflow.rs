//! Overflow pages.
//!
//! Values longer than [`INLINE_VALUE_LIMIT`](crate::types::INLINE_VALUE_LIMIT)
//! are split into a singly linked chain of overflow pages.
//!
//! ```text
//! Offset  Size  Description
//! 0       1     Page type (0x0F)
//! 1       4     Next page in the chain (0 at the end)
//! 5       2     Bytes of payload on this page
//! 7       ...   Payload
//! ```

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::types::{PageId, PageType, PAGE_SIZE};

const OVERFLOW_HEADER_SIZE: usize = 7;

/// Payload bytes per overflow page
pub const OVERFLOW_CAPACITY: usize = PAGE_SIZE - OVERFLOW_HEADER_SIZE;

/// View over one page of an overflow chain
pub struct OverflowPage;

impl OverflowPage {
    /// Build an overflow page holding `chunk`, linked to `next`
    pub fn build(chunk: &[u8], next: PageId) -> PageBuf {
        debug_assert!(chunk.len() <= OVERFLOW_CAPACITY);
        let mut buf = PageBuf::new();
        buf[0] = PageType::Overflow as u8;
        buf[1..5].copy_from_slice(&next.to_be_bytes());
        buf[5..7].copy_from_slice(&(chunk.len() as u16).to_be_bytes());
        buf[OVERFLOW_HEADER_SIZE..OVERFLOW_HEADER_SIZE + chunk.len()].copy_from_slice(chunk);
        buf
    }

    /// Split a page into its payload and the next page id
    pub fn parse(page_id: PageId, buf: &PageBuf) -> Result<(&[u8], PageId)> {
        if PageType::from_byte(buf[0]) != Some(PageType::Overflow) {
            return Err(StorageError::corruption(format!(
                "page {} is not an overflow page",
                page_id
            )));
        }
        let next = PageId::from_be_slice(&buf[1..5]);
        let len = u16::from_be_bytes([buf[5], buf[6]]) as usize;
        if len > OVERFLOW_CAPACITY {
            return Err(StorageError::corruption(format!(
                "overflow page {} claims {} bytes",
                page_id, len
            )));
        }
        Ok((&buf[OVERFLOW_HEADER_SIZE..OVERFLOW_HEADER_SIZE + len], next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_page_layout() {
        let buf = OverflowPage::build(b"payload", PageId::new(9));
        let (chunk, next) = OverflowPage::parse(PageId::new(3), &buf).unwrap();
        assert_eq!(chunk, b"payload");
        assert_eq!(next, PageId::new(9));
    }

    #[test]
    fn test_rejects_wrong_page_type() {
        let buf = PageBuf::new();
        assert!(OverflowPage::parse(PageId::new(3), &buf).is_err());
    }
}
