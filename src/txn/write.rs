//! The read-write transaction and its commit protocol.
//!
//! Commit sequence:
//! 1. Persist the free list into pages that no committed state uses.
//! 2. Write every dirty page, then sync.
//! 3. Write the new meta page into slot `txid % 2`, then sync.
//! 4. Publish the new state to the cache and to future transactions.
//!
//! A crash before step 3 completes leaves the previous meta page as the
//! newest valid one, and nothing it references has been overwritten.

use crate::btree::{validate_key, BTree, Cursor, PageSink, PageSource};
use crate::db::{Db, FreeState};
use crate::error::{Result, StorageError};
use crate::page::{PageBuf, SlottedPage};
use crate::storage::{DiskManager, FileHeader, FreeList};
use crate::txn::Snapshot;
use crate::types::PageId;
use parking_lot::{MutexGuard, RwLockReadGuard};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

enum Dirty {
    Node(Arc<SlottedPage>),
    Raw(PageBuf),
}

/// Pages written by the transaction on top of the committed state
pub struct WriteState<'db> {
    db: &'db Db,
    /// Working header: root, height and page count of the new state
    meta: FileHeader,
    freelist: FreeList,
    /// Free-list chain of the committed state
    chain: Vec<PageId>,
    dirty: HashMap<PageId, Dirty>,
    /// Pages first allocated by this transaction
    allocated: HashSet<PageId>,
}

impl<'db> WriteState<'db> {
    fn snapshot(&self) -> Snapshot<'db> {
        Snapshot::new(self.db, self.meta.page_count)
    }

    fn allocate(&mut self) -> Result<PageId> {
        let page_id = match self.freelist.allocate() {
            Some(page_id) => page_id,
            None => {
                let page_id = PageId::new(self.meta.page_count);
                self.meta.page_count = self
                    .meta
                    .page_count
                    .checked_add(1)
                    .ok_or_else(|| StorageError::invalid_operation("database file is full"))?;
                page_id
            }
        };
        self.allocated.insert(page_id);
        Ok(page_id)
    }
}

impl PageSource for WriteState<'_> {
    fn node(&self, page_id: PageId) -> Result<Arc<SlottedPage>> {
        match self.dirty.get(&page_id) {
            Some(Dirty::Node(page)) => Ok(Arc::clone(page)),
            Some(Dirty::Raw(_)) => Err(StorageError::invalid_page(format!(
                "page {} is not a node page",
                page_id
            ))),
            None => self.snapshot().node(page_id),
        }
    }

    fn raw(&self, page_id: PageId) -> Result<PageBuf> {
        match self.dirty.get(&page_id) {
            Some(Dirty::Raw(buf)) => Ok(buf.clone()),
            Some(Dirty::Node(page)) => Ok(PageBuf::from_bytes(page.as_bytes())),
            None => self.snapshot().raw(page_id),
        }
    }
}

impl PageSink for WriteState<'_> {
    fn write_node(&mut self, previous: Option<PageId>, page: SlottedPage) -> Result<PageId> {
        let page_id = match previous {
            Some(id) if self.allocated.contains(&id) => id,
            Some(id) => {
                self.release(id);
                self.allocate()?
            }
            None => self.allocate()?,
        };
        self.dirty.insert(page_id, Dirty::Node(Arc::new(page)));
        Ok(page_id)
    }

    fn write_raw(&mut self, page: PageBuf) -> Result<PageId> {
        let page_id = self.allocate()?;
        self.dirty.insert(page_id, Dirty::Raw(page));
        Ok(page_id)
    }

    fn release(&mut self, page_id: PageId) {
        if self.allocated.remove(&page_id) {
            // never committed, so no snapshot can see it
            self.dirty.remove(&page_id);
            self.freelist.push(page_id);
        } else {
            self.freelist.free(self.meta.txid, page_id);
        }
    }
}

/// The single read-write transaction.
///
/// Dropping it without calling [`commit`](Self::commit) discards every
/// change. After any failed operation the transaction can only be rolled
/// back.
pub struct WriteTxn<'db> {
    state: WriteState<'db>,
    /// Something changed that the next meta page must record
    modified: bool,
    failed: bool,
    finished: bool,
    _writer: MutexGuard<'db, ()>,
    _gate: RwLockReadGuard<'db, bool>,
}

impl<'db> WriteTxn<'db> {
    pub(crate) fn new(
        db: &'db Db,
        writer: MutexGuard<'db, ()>,
        gate: RwLockReadGuard<'db, bool>,
    ) -> Self {
        let committed = db.meta.read().clone();

        // Pages freed by commits no reader can still see become reusable.
        let oldest_reader = db.readers.lock().keys().next().copied();
        let horizon = oldest_reader.unwrap_or(committed.txid).min(committed.txid);
        let (freelist, chain) = {
            let mut free = db.freelist.lock();
            let released = free.list.release(horizon);
            if released > 0 {
                trace!(released, horizon, "released pending pages");
            }
            (free.list.clone(), free.chain.clone())
        };

        let mut meta = committed;
        meta.txid += 1;
        trace!(txid = meta.txid, "began write transaction");

        Self {
            state: WriteState {
                db,
                meta,
                freelist,
                chain,
                dirty: HashMap::new(),
                allocated: HashSet::new(),
            },
            modified: false,
            failed: false,
            finished: false,
            _writer: writer,
            _gate: gate,
        }
    }

    /// Id the commit of this transaction will carry
    pub fn txid(&self) -> u64 {
        self.state.meta.txid
    }

    fn check_usable(&self) -> Result<()> {
        if self.failed {
            return Err(StorageError::invalid_operation(
                "transaction failed earlier and must be rolled back",
            ));
        }
        Ok(())
    }

    fn with_tree<T>(
        &mut self,
        op: impl FnOnce(&mut BTree<&mut WriteState<'db>>) -> Result<T>,
    ) -> Result<T> {
        self.check_usable()?;
        let (root, height) = (self.state.meta.root_page, self.state.meta.tree_height);
        let mut tree = BTree::new(&mut self.state, root, height);
        let result = op(&mut tree);
        let (root, height) = (tree.root(), tree.height());

        match result {
            Ok(value) => {
                self.state.meta.root_page = root;
                self.state.meta.tree_height = height;
                Ok(value)
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Insert or replace the value stored under `key`, returning the
    /// previous value
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let max = self.state.db.max_value_size;
        if value.len() > max {
            return Err(StorageError::ValueTooLarge {
                size: value.len(),
                max,
            });
        }
        let old = self.with_tree(|tree| tree.put(key, value))?;
        self.modified = true;
        Ok(old)
    }

    /// Remove `key`, returning its value if it was present
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let removed = self.with_tree(|tree| tree.delete(key))?;
        self.modified |= removed.is_some();
        Ok(removed)
    }

    fn tree(&self) -> BTree<&WriteState<'db>> {
        BTree::new(
            &self.state,
            self.state.meta.root_page,
            self.state.meta.tree_height,
        )
    }

    /// Look up a key, seeing this transaction's own writes
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_usable()?;
        self.tree().get(key)
    }

    /// Iterate over the transaction's current view in key order
    pub fn iter(&self) -> Cursor<&WriteState<'db>> {
        Cursor::new(&self.state, self.state.meta.root_page)
    }

    /// Iterate from the first key `>= key`
    pub fn seek(&self, key: &[u8]) -> Cursor<&WriteState<'db>> {
        Cursor::seek(&self.state, self.state.meta.root_page, key)
    }

    /// Record the configured bucket name in the next meta page
    pub(crate) fn create_bucket(&mut self, name: &str) {
        self.state.meta.bucket = name.to_string();
        self.modified = true;
    }

    /// Make every change durable and visible.
    ///
    /// On error nothing is published and the previous commit stays in
    /// force.
    pub fn commit(mut self) -> Result<()> {
        self.check_usable()?;
        self.finished = true;

        if !self.modified {
            trace!(txid = self.txid(), "nothing to commit");
            return Ok(());
        }

        let started = Instant::now();
        let db = self.state.db;
        let state = &mut self.state;
        let txid = state.meta.txid;

        // The committed chain stays readable until this commit is durable.
        for page_id in std::mem::take(&mut state.chain) {
            state.freelist.free(txid, page_id);
        }
        let chain = reserve_chain(state)?;
        let chain_pages = FreeList::encode(&state.freelist.all_ids(), &chain);
        state.meta.freelist_page = chain.first().copied().unwrap_or(PageId::NONE);

        let mut written: Vec<PageId> = state.dirty.keys().copied().collect();
        written.sort_unstable();
        for page_id in &written {
            match &state.dirty[page_id] {
                Dirty::Node(page) => db.disk.write_page(*page_id, page.as_bytes())?,
                Dirty::Raw(buf) => db.disk.write_page(*page_id, buf)?,
            }
        }
        for (page_id, buf) in chain.iter().zip(&chain_pages) {
            db.disk.write_page(*page_id, buf)?;
        }
        // pages allocated at the end but released again are never written
        db.disk.grow(state.meta.page_count)?;
        db.disk.sync()?;

        db.disk.write_header(&state.meta)?;
        db.disk.sync()?;

        // Install new node pages before the new root becomes visible.
        for (page_id, page) in state.dirty.drain() {
            match page {
                Dirty::Node(page) => db.cache.insert(page_id, page),
                Dirty::Raw(_) => db.cache.invalidate(page_id),
            }
        }
        for page_id in &chain {
            db.cache.invalidate(*page_id);
        }

        *db.freelist.lock() = FreeState {
            list: std::mem::take(&mut state.freelist),
            chain,
        };
        *db.meta.write() = state.meta.clone();

        debug!(
            txid,
            pages = written.len(),
            root = %state.meta.root_page,
            page_count = state.meta.page_count,
            elapsed_us = started.elapsed().as_micros() as u64,
            "committed"
        );
        Ok(())
    }

    /// Discard every change
    pub fn rollback(mut self) {
        self.finished = true;
        trace!(txid = self.txid(), "rolled back");
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished && self.modified {
            debug!(txid = self.txid(), "write transaction dropped without commit");
        }
    }
}

/// Pick the pages the free list will be written to.
///
/// Reusable pages are taken first; each one taken shrinks the list, so
/// the loop ends with at most one spare page, which is written empty.
fn reserve_chain(state: &mut WriteState<'_>) -> Result<Vec<PageId>> {
    let mut chain = Vec::new();
    loop {
        let remaining = state.freelist.free_count() + state.freelist.pending_count();
        if chain.len() >= FreeList::pages_needed(remaining) {
            break;
        }
        let page_id = match state.freelist.allocate() {
            Some(page_id) => page_id,
            None => {
                let page_id = PageId::new(state.meta.page_count);
                state.meta.page_count = state
                    .meta
                    .page_count
                    .checked_add(1)
                    .ok_or_else(|| StorageError::invalid_operation("database file is full"))?;
                page_id
            }
        };
        chain.push(page_id);
    }
    Ok(chain)
}
