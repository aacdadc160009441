//! Database handle: owns the file, the page cache and the committed state,
//! and hands out transactions.

use crate::buffer::{CacheStats, PageCache};
use crate::error::{Result, StorageError};
use crate::storage::{DiskManager, DiskManagerImpl, FileHeader, FreeList};
use crate::txn::{ReadTxn, WriteTxn};
use crate::types::{PageId, META_PAGE_COUNT};
use crate::Config;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Free pages of the committed state and the pages its list is stored on
#[derive(Debug, Default)]
pub(crate) struct FreeState {
    pub list: FreeList,
    pub chain: Vec<PageId>,
}

/// Transactional key-value store in a single file.
///
/// Any number of [`ReadTxn`]s may run alongside one [`WriteTxn`]; a second
/// writer blocks until the first one finishes.
pub struct Db {
    pub(crate) disk: DiskManagerImpl,
    pub(crate) cache: PageCache,
    /// Header of the latest commit
    pub(crate) meta: RwLock<FileHeader>,
    pub(crate) freelist: Mutex<FreeState>,
    /// Open readers per snapshot txid
    pub(crate) readers: Mutex<BTreeMap<u64, usize>>,
    pub(crate) max_value_size: usize,
    writer: Mutex<()>,
    /// Set once by `close`; every transaction holds a read guard
    closed: RwLock<bool>,
    read_only: bool,
}

impl Db {
    /// Open or create a database.
    ///
    /// Blocks up to [`Config::lock_timeout`] while another handle holds
    /// the file. A new file gets its bucket created before this returns.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let (disk, header) = DiskManagerImpl::open(&config)?;
        if header.has_bucket() && header.bucket != config.bucket {
            return Err(StorageError::BucketMismatch {
                expected: config.bucket,
                found: header.bucket,
            });
        }
        if !header.has_bucket() && config.read_only {
            return Err(StorageError::BucketNotFound(config.bucket));
        }

        let freelist = load_freelist(&disk, &header)?;
        let needs_bucket = !header.has_bucket();

        let db = Self {
            disk,
            cache: PageCache::new(config.cache_size),
            meta: RwLock::new(header),
            freelist: Mutex::new(freelist),
            readers: Mutex::new(BTreeMap::new()),
            max_value_size: config.max_value_size,
            writer: Mutex::new(()),
            closed: RwLock::new(false),
            read_only: config.read_only,
        };

        if needs_bucket {
            let mut txn = db.begin_write()?;
            txn.create_bucket(&config.bucket);
            txn.commit()?;
            info!(bucket = %config.bucket, "created bucket");
        }

        Ok(db)
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        self.disk.path()
    }

    /// Whether this handle was opened read-only
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Start a snapshot read
    pub fn begin_read(&self) -> Result<ReadTxn<'_>> {
        let gate = self.closed.read_recursive();
        if *gate {
            return Err(StorageError::Closed);
        }
        Ok(ReadTxn::new(self, gate))
    }

    /// Start the write transaction, waiting for the current one to finish
    pub fn begin_write(&self) -> Result<WriteTxn<'_>> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        let gate = self.closed.read_recursive();
        if *gate {
            return Err(StorageError::Closed);
        }
        let writer = self.writer.lock();
        Ok(WriteTxn::new(self, writer, gate))
    }

    /// Run `f` inside a read transaction
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ReadTxn<'_>) -> Result<T>,
    {
        let txn = self.begin_read()?;
        f(&txn)
    }

    /// Run `f` inside a write transaction, committing if it succeeds and
    /// rolling back if it fails
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<T>,
    {
        let mut txn = self.begin_write()?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.rollback();
                Err(e)
            }
        }
    }

    /// Release the file lock and refuse further transactions.
    ///
    /// Waits for open transactions to finish, so it must not be called
    /// from a thread that holds one. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut closed = self.closed.write();
        if *closed {
            return Ok(());
        }
        *closed = true;
        self.cache.clear();
        self.disk.close()?;

        info!(path = %self.path().display(), "closed database");
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Current layout and cache figures
    pub fn stats(&self) -> Result<Stats> {
        // counted before our own reader registers
        let open_readers = self.readers.lock().values().sum();
        let txn = self.begin_read()?;
        let meta = txn.meta();
        let (free_pages, pending_pages, freelist_pages) = {
            let free = self.freelist.lock();
            (
                free.list.free_count(),
                free.list.pending_count(),
                free.chain.len(),
            )
        };

        Ok(Stats {
            path: self.path().to_path_buf(),
            bucket: meta.bucket.clone(),
            txid: meta.txid,
            page_count: meta.page_count,
            file_size: self.disk.file_len()?,
            tree_height: meta.tree_height,
            free_pages,
            pending_pages,
            freelist_pages,
            open_readers,
            cache: self.cache.stats(),
        })
    }

    /// Walk the whole file and check that every page is accounted for.
    ///
    /// The tree must satisfy its ordering and balance invariants, and each
    /// data page must be exactly one of: a tree page, a free-list page, or
    /// a free page. Blocks writers while it runs.
    pub fn check(&self) -> Result<CheckReport> {
        let _writer = self.writer.lock();
        let txn = self.begin_read()?;
        let entries = txn.verify()?;
        let tree_pages = txn.tree_pages()?;
        let page_count = txn.meta().page_count;

        let (free_ids, chain) = {
            let free = self.freelist.lock();
            (free.list.all_ids(), free.chain.clone())
        };

        let mut owner: Vec<Option<&str>> = vec![None; page_count as usize];
        let groups = [
            ("tree", &tree_pages),
            ("free-list", &chain),
            ("free", &free_ids),
        ];
        for (what, ids) in groups {
            for id in ids.iter() {
                let slot = owner
                    .get_mut(id.value() as usize)
                    .filter(|_| id.value() >= META_PAGE_COUNT)
                    .ok_or_else(|| {
                        StorageError::corruption(format!("{} page {} outside the file", what, id))
                    })?;
                if let Some(other) = slot.replace(what) {
                    return Err(StorageError::corruption(format!(
                        "page {} is both a {} page and a {} page",
                        id, other, what
                    )));
                }
            }
        }

        let unaccounted: Vec<u32> = (META_PAGE_COUNT..page_count)
            .filter(|&id| owner[id as usize].is_none())
            .collect();
        if !unaccounted.is_empty() {
            return Err(StorageError::corruption(format!(
                "{} pages are neither used nor free (first: {})",
                unaccounted.len(),
                unaccounted[0]
            )));
        }

        Ok(CheckReport {
            entries,
            page_count,
            tree_pages: tree_pages.len(),
            freelist_pages: chain.len(),
            free_pages: free_ids.len(),
        })
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path().display(), error = %e, "failed to close database");
        }
    }
}

/// Read the persisted free list of the opened state
fn load_freelist(disk: &DiskManagerImpl, header: &FileHeader) -> Result<FreeState> {
    let mut ids = Vec::new();
    let mut chain = Vec::new();
    let mut next = header.freelist_page;

    while next.is_some() {
        if chain.len() >= header.page_count as usize {
            return Err(StorageError::corruption("free-list chain loops"));
        }
        let buf = disk.read_page(next)?;
        let (page_ids, following) = FreeList::decode_page(next, &buf, header.page_count)?;
        ids.extend(page_ids);
        chain.push(next);
        next = following;
    }

    Ok(FreeState {
        list: FreeList::from_ids(ids),
        chain,
    })
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub path: PathBuf,
    pub bucket: String,
    /// Id of the latest commit
    pub txid: u64,
    /// Pages in use or free, meta pages included
    pub page_count: u32,
    pub file_size: u64,
    pub tree_height: u32,
    /// Pages ready for reuse
    pub free_pages: usize,
    /// Freed pages an open or recent snapshot may still read
    pub pending_pages: usize,
    /// Pages holding the persisted free list
    pub freelist_pages: usize,
    pub open_readers: usize,
    pub cache: CacheStats,
}

/// Result of [`Db::check`]
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub entries: usize,
    pub page_count: u32,
    pub tree_pages: usize,
    pub freelist_pages: usize,
    pub free_pages: usize,
}
