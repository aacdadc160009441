//! Page layer: slotted node pages and raw overflow pages.
//!
//! Node pages use a slotted format where:
//! - A fixed header contains metadata
//! - Cell pointers grow from the header toward the end
//! - Cell content grows from the end toward the header
//! - Free space is in the middle

mod cell;
mod header;
mod overflow;
mod slotted;

pub use cell::{Cell, CellType, CellValue};
pub use header::{PageHeader, INTERIOR_HEADER_SIZE, LEAF_HEADER_SIZE};
pub use overflow::{OverflowPage, OVERFLOW_CAPACITY};
pub use slotted::SlottedPage;

use crate::types::PAGE_SIZE;

/// A raw page buffer
#[derive(Clone)]
pub struct PageBuf {
    data: Box<[u8; PAGE_SIZE]>,
}

impl PageBuf {
    /// Create a new zeroed page buffer
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Create a page buffer from raw bytes, zero-padding short input
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self::new();
        let len = bytes.len().min(PAGE_SIZE);
        buf.data[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    /// Get a reference to the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    /// Get a mutable reference to the raw bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }
}

impl Default for PageBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PageBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuf").field("type", &self.data[0]).finish()
    }
}

impl std::ops::Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data[..]
    }
}

impl std::ops::DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data[..]
    }
}
