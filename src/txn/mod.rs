//! Transactions.
//!
//! A [`ReadTxn`] pins the committed state it started from and sees nothing
//! committed afterwards. A [`WriteTxn`] builds the next state on top of
//! the latest one by copy-on-write; only one exists at a time, and its
//! changes become visible (and durable) together when it commits.

mod read;
mod write;

pub use read::ReadTxn;
pub use write::{WriteState, WriteTxn};

use crate::btree::PageSource;
use crate::db::Db;
use crate::error::{Result, StorageError};
use crate::page::{PageBuf, SlottedPage};
use crate::storage::DiskManager;
use crate::types::{PageId, META_PAGE_COUNT};
use std::sync::Arc;

/// Committed pages of one state, read through the shared cache
#[derive(Clone, Copy)]
pub struct Snapshot<'db> {
    db: &'db Db,
    /// Pages at or beyond this id do not exist in this state
    page_count: u32,
}

impl<'db> Snapshot<'db> {
    pub(crate) fn new(db: &'db Db, page_count: u32) -> Self {
        Self { db, page_count }
    }

    fn check(&self, page_id: PageId) -> Result<()> {
        if page_id.value() < META_PAGE_COUNT || page_id.value() >= self.page_count {
            return Err(StorageError::corruption(format!(
                "reference to page {} outside data pages {}..{}",
                page_id, META_PAGE_COUNT, self.page_count
            )));
        }
        Ok(())
    }
}

impl PageSource for Snapshot<'_> {
    fn node(&self, page_id: PageId) -> Result<Arc<SlottedPage>> {
        self.check(page_id)?;
        self.db.cache.get_or_load(page_id, || {
            let buf = self.db.disk.read_page(page_id)?;
            SlottedPage::from_bytes(&buf)
        })
    }

    fn raw(&self, page_id: PageId) -> Result<PageBuf> {
        self.check(page_id)?;
        self.db.disk.read_page(page_id)
    }
}
