//! Read-only snapshot transactions.

use crate::btree::{BTree, Cursor};
use crate::db::Db;
use crate::error::{Result, StorageError};
use crate::storage::FileHeader;
use crate::types::PageId;
use crate::txn::Snapshot;
use parking_lot::RwLockReadGuard;
use tracing::trace;

/// A consistent view of the store as of the last commit before it began.
///
/// The pages of this view are kept from reuse until the transaction is
/// dropped, so long-lived readers make the file grow under write load.
pub struct ReadTxn<'db> {
    db: &'db Db,
    meta: FileHeader,
    _gate: RwLockReadGuard<'db, bool>,
}

impl<'db> ReadTxn<'db> {
    pub(crate) fn new(db: &'db Db, gate: RwLockReadGuard<'db, bool>) -> Self {
        let meta = {
            let mut readers = db.readers.lock();
            let meta = db.meta.read().clone();
            *readers.entry(meta.txid).or_insert(0) += 1;
            meta
        };
        trace!(txid = meta.txid, "began read transaction");
        Self {
            db,
            meta,
            _gate: gate,
        }
    }

    /// Id of the commit this snapshot reflects
    pub fn txid(&self) -> u64 {
        self.meta.txid
    }

    fn tree(&self) -> BTree<Snapshot<'db>> {
        BTree::new(
            Snapshot::new(self.db, self.meta.page_count),
            self.meta.root_page,
            self.meta.tree_height,
        )
    }

    /// Look up a key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tree().get(key)
    }

    /// Iterate over every entry in ascending key order
    pub fn iter(&self) -> Cursor<Snapshot<'db>> {
        Cursor::new(
            Snapshot::new(self.db, self.meta.page_count),
            self.meta.root_page,
        )
    }

    /// Iterate from the first key `>= key`
    pub fn seek(&self, key: &[u8]) -> Cursor<Snapshot<'db>> {
        Cursor::seek(
            Snapshot::new(self.db, self.meta.page_count),
            self.meta.root_page,
            key,
        )
    }

    /// Visit every entry in key order until `visit` fails.
    ///
    /// Read errors are converted into `E`; the first error from either
    /// side ends the scan.
    pub fn for_each<F, E>(&self, mut visit: F) -> std::result::Result<(), E>
    where
        F: FnMut(&[u8], &[u8]) -> std::result::Result<(), E>,
        E: From<StorageError>,
    {
        for entry in self.iter() {
            let (key, value) = entry?;
            visit(&key, &value)?;
        }
        Ok(())
    }

    /// Whether the snapshot holds no entries
    pub fn is_empty(&self) -> bool {
        self.meta.root_page.is_none()
    }

    /// Check the tree's structural invariants, returning its entry count
    pub fn verify(&self) -> Result<usize> {
        self.tree().verify()
    }

    pub(crate) fn meta(&self) -> &FileHeader {
        &self.meta
    }

    pub(crate) fn tree_pages(&self) -> Result<Vec<PageId>> {
        self.tree().page_ids()
    }
}

impl Drop for ReadTxn<'_> {
    fn drop(&mut self) {
        let mut readers = self.db.readers.lock();
        if let Some(count) = readers.get_mut(&self.meta.txid) {
            *count -= 1;
            if *count == 0 {
                readers.remove(&self.meta.txid);
            }
        }
        trace!(txid = self.meta.txid, "ended read transaction");
    }
}
