//! Copy-on-write B-tree.
//!
//! This module provides the ordered map behind each transaction:
//! - Point lookups (get)
//! - Insertions and updates (put)
//! - Deletions with merge/redistribute (delete)
//! - Ordered iteration (cursor)
//!
//! The tree never modifies a committed page. Every change goes through a
//! [`PageSink`], which decides whether a page can be overwritten (it was
//! written earlier in the same transaction) or must be copied to a new
//! location.

mod cursor;
mod tree;

pub use cursor::Cursor;
pub use tree::BTree;

pub(crate) use tree::{read_value, validate_key};

use crate::error::Result;
use crate::page::{PageBuf, SlottedPage};
use crate::types::PageId;
use std::sync::Arc;

/// Read access to the pages of one snapshot
pub trait PageSource {
    /// Fetch a decoded node page
    fn node(&self, page_id: PageId) -> Result<Arc<SlottedPage>>;

    /// Fetch a raw page (overflow chains)
    fn raw(&self, page_id: PageId) -> Result<PageBuf>;
}

/// Write access for a transaction building a new snapshot
pub trait PageSink: PageSource {
    /// Store a node page that replaces `previous`, returning its id.
    ///
    /// `previous` is released unless the sink can overwrite it in place.
    fn write_node(&mut self, previous: Option<PageId>, page: SlottedPage) -> Result<PageId>;

    /// Store a raw page at a fresh location
    fn write_raw(&mut self, page: PageBuf) -> Result<PageId>;

    /// The page is no longer reachable from the snapshot being built
    fn release(&mut self, page_id: PageId);
}

impl<T: PageSource + ?Sized> PageSource for &T {
    fn node(&self, page_id: PageId) -> Result<Arc<SlottedPage>> {
        (**self).node(page_id)
    }

    fn raw(&self, page_id: PageId) -> Result<PageBuf> {
        (**self).raw(page_id)
    }
}

impl<T: PageSource + ?Sized> PageSource for &mut T {
    fn node(&self, page_id: PageId) -> Result<Arc<SlottedPage>> {
        (**self).node(page_id)
    }

    fn raw(&self, page_id: PageId) -> Result<PageBuf> {
        (**self).raw(page_id)
    }
}

impl<T: PageSink + ?Sized> PageSink for &mut T {
    fn write_node(&mut self, previous: Option<PageId>, page: SlottedPage) -> Result<PageId> {
        (**self).write_node(previous, page)
    }

    fn write_raw(&mut self, page: PageBuf) -> Result<PageId> {
        (**self).write_raw(page)
    }

    fn release(&mut self, page_id: PageId) {
        (**self).release(page_id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory page store for exercising the tree without a file.

    use super::*;
    use crate::error::StorageError;
    use std::collections::HashMap;

    /// Every write goes to a fresh page; released pages are reused at once
    #[derive(Default)]
    pub struct MemPages {
        pub nodes: HashMap<PageId, Arc<SlottedPage>>,
        pub raw: HashMap<PageId, PageBuf>,
        next: u32,
        free: Vec<PageId>,
    }

    impl MemPages {
        fn allocate(&mut self) -> PageId {
            self.free.pop().unwrap_or_else(|| {
                self.next += 1;
                PageId::new(self.next + 1)
            })
        }

        /// Pages currently holding data
        pub fn live(&self) -> usize {
            self.nodes.len() + self.raw.len()
        }
    }

    impl PageSource for MemPages {
        fn node(&self, page_id: PageId) -> Result<Arc<SlottedPage>> {
            self.nodes
                .get(&page_id)
                .cloned()
                .ok_or(StorageError::PageNotFound(page_id))
        }

        fn raw(&self, page_id: PageId) -> Result<PageBuf> {
            self.raw
                .get(&page_id)
                .cloned()
                .ok_or(StorageError::PageNotFound(page_id))
        }
    }

    impl PageSink for MemPages {
        fn write_node(&mut self, previous: Option<PageId>, page: SlottedPage) -> Result<PageId> {
            if let Some(previous) = previous {
                self.release(previous);
            }
            let id = self.allocate();
            self.nodes.insert(id, Arc::new(page));
            Ok(id)
        }

        fn write_raw(&mut self, page: PageBuf) -> Result<PageId> {
            let id = self.allocate();
            self.raw.insert(id, page);
            Ok(id)
        }

        fn release(&mut self, page_id: PageId) {
            let held = self.nodes.remove(&page_id).is_some() || self.raw.remove(&page_id).is_some();
            assert!(held, "released page {} twice", page_id);
            self.free.push(page_id);
        }
    }
}
