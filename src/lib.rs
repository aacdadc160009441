//! # docstore
//!
//! An embedded, crash-safe, ordered key-value store kept in a single file.
//!
//! ## Architecture
//!
//! The store is composed of layered components:
//!
//! - **Page Layer** (`page`): Slotted node pages, overflow pages, cell format
//! - **Storage Layer** (`storage`): File I/O, file lock, meta pages, free list
//! - **Buffer Layer** (`buffer`): LRU cache of committed node pages
//! - **B-Tree Layer** (`btree`): Copy-on-write B-tree and cursor
//! - **Transactions** (`txn`, [`Db`]): One writer and many snapshot readers;
//!   a commit becomes durable by atomically switching meta pages
//! - **Facade** ([`Storage`]): Auto-committed `set`/`get`/`delete`/`for_each`
//!   on the document bucket
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docstore::Storage;
//!
//! # fn main() -> Result<(), docstore::StoreError> {
//! let store = Storage::open("documents.db")?;
//!
//! store.set(b"hello", b"world")?;
//! assert_eq!(store.get(b"hello")?, Some(b"world".to_vec()));
//!
//! store.for_each(|key, value| {
//!     println!("{:?} -> {:?}", key, value);
//!     Ok::<(), std::io::Error>(())
//! })?;
//!
//! store.delete(b"hello")?;
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod btree;
pub mod buffer;
mod db;
pub mod error;
pub mod page;
pub mod storage;
pub mod txn;
pub mod types;

pub use db::{CheckReport, Db, Stats};
pub use error::{CallbackError, Result, StorageError, StoreError};
pub use txn::{ReadTxn, WriteTxn};
pub use types::{PageId, MAX_KEY_SIZE, PAGE_SIZE};

use crate::storage::MAX_BUCKET_NAME;
use crate::types::DEFAULT_MAX_VALUE_SIZE;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bucket the facade stores documents in
pub const DEFAULT_BUCKET: &str = "gwkDocuments";

/// How long `open` waits for another handle to release the file
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default page cache size, in pages
pub const DEFAULT_CACHE_SIZE: usize = 1024;

/// Database configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the database file
    pub path: PathBuf,
    /// Page cache size in number of pages (default: 1024, 0 disables)
    pub cache_size: usize,
    /// Skip fsync at commit. Commits stay atomic but the latest ones may
    /// be lost on power failure. (default: false)
    pub no_sync: bool,
    /// How long to wait for the file lock (default: one hour)
    pub lock_timeout: Duration,
    /// Open with a shared lock and refuse writes (default: false)
    pub read_only: bool,
    /// Name of the bucket the file holds (default: `gwkDocuments`)
    pub bucket: String,
    /// Largest value accepted by `put` (default: 64 MiB)
    pub max_value_size: usize,
    /// Permission bits for a newly created file (default: 0o600)
    pub file_mode: u32,
}

impl Config {
    /// Create a new configuration with default settings
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            cache_size: DEFAULT_CACHE_SIZE,
            no_sync: false,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            read_only: false,
            bucket: DEFAULT_BUCKET.to_string(),
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            file_mode: 0o600,
        }
    }

    /// Set page cache size
    pub fn cache_size(mut self, pages: usize) -> Self {
        self.cache_size = pages;
        self
    }

    /// Skip fsync at commit
    pub fn no_sync(mut self, enabled: bool) -> Self {
        self.no_sync = enabled;
        self
    }

    /// Set how long `open` waits for the file lock; zero tries once
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Open read-only
    pub fn read_only(mut self, enabled: bool) -> Self {
        self.read_only = enabled;
        self
    }

    /// Set the bucket name
    pub fn bucket(mut self, name: impl Into<String>) -> Self {
        self.bucket = name.into();
        self
    }

    /// Set the largest accepted value
    pub fn max_value_size(mut self, bytes: usize) -> Self {
        self.max_value_size = bytes;
        self
    }

    /// Set permission bits for a newly created file (Unix only)
    pub fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() || self.bucket.len() > MAX_BUCKET_NAME {
            return Err(StorageError::invalid_operation(format!(
                "bucket name must be 1 to {} bytes, got {}",
                MAX_BUCKET_NAME,
                self.bucket.len()
            )));
        }
        Ok(())
    }
}

/// Document store: auto-committed operations on a single bucket.
///
/// Every `set` and `delete` is its own durable transaction; `get` and
/// `for_each` read the latest commit. After [`close`](Self::close) every
/// operation fails with an error for which
/// [`StoreError::is_closed`] is true.
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open or create the store at `path` with default settings.
    ///
    /// Waits up to [`DEFAULT_LOCK_TIMEOUT`] if another handle has the file
    /// open.
    pub fn open(path: impl AsRef<Path>) -> std::result::Result<Self, StoreError> {
        Self::open_with(Config::new(path.as_ref()))
    }

    /// Open or create the store with a custom configuration
    pub fn open_with(config: Config) -> std::result::Result<Self, StoreError> {
        let path = config.path.clone();
        Db::open(config)
            .map(|db| Self { db })
            .map_err(|source| StoreError::Open { path, source })
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn set(&self, key: &[u8], value: &[u8]) -> std::result::Result<(), StoreError> {
        self.db
            .update(|txn| txn.put(key, value).map(drop))
            .map_err(StoreError::Write)
    }

    /// Fetch the value under `key`; `None` if absent
    pub fn get(&self, key: &[u8]) -> std::result::Result<Option<Vec<u8>>, StoreError> {
        self.db.view(|txn| txn.get(key)).map_err(StoreError::Read)
    }

    /// Remove `key`. Removing an absent key succeeds and writes nothing.
    pub fn delete(&self, key: &[u8]) -> std::result::Result<(), StoreError> {
        self.db
            .update(|txn| txn.delete(key).map(drop))
            .map_err(StoreError::Write)
    }

    /// Call `visit` for every entry in ascending key order.
    ///
    /// The scan reads one snapshot, so concurrent writes are not seen. It
    /// stops at the first error: a failure from `visit` comes back as
    /// [`StoreError::Callback`] holding that error, a read failure as
    /// [`StoreError::Iteration`].
    pub fn for_each<F, E>(&self, mut visit: F) -> std::result::Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]) -> std::result::Result<(), E>,
        E: Into<CallbackError>,
    {
        let txn = self.db.begin_read().map_err(StoreError::Iteration)?;
        for entry in txn.iter() {
            let (key, value) = entry.map_err(StoreError::Iteration)?;
            visit(&key, &value).map_err(StoreError::callback)?;
        }
        Ok(())
    }

    /// Path of the file holding the data
    pub fn wal_name(&self) -> &Path {
        self.db.path()
    }

    /// Release the file. Later calls to any operation fail; closing again
    /// is a no-op.
    pub fn close(&self) -> std::result::Result<(), StoreError> {
        self.db.close().map_err(StoreError::Close)
    }

    /// Layout and cache figures
    pub fn stats(&self) -> std::result::Result<Stats, StoreError> {
        self.db.stats().map_err(StoreError::Read)
    }

    /// The underlying transactional handle
    pub fn db(&self) -> &Db {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(path: &Path) -> Storage {
        Storage::open_with(Config::new(path).no_sync(true).lock_timeout(Duration::ZERO)).unwrap()
    }

    #[test]
    fn test_basic_operations() -> std::result::Result<(), StoreError> {
        let dir = tempdir().unwrap();
        let store = open(&dir.path().join("test.db"));

        store.set(b"key1", b"value1")?;
        assert_eq!(store.get(b"key1")?, Some(b"value1".to_vec()));

        store.set(b"key1", b"value2")?;
        assert_eq!(store.get(b"key1")?, Some(b"value2".to_vec()));

        store.delete(b"key1")?;
        assert_eq!(store.get(b"key1")?, None);

        // absent keys
        assert_eq!(store.get(b"nonexistent")?, None);
        store.delete(b"nonexistent")?;

        Ok(())
    }

    #[test]
    fn test_wal_name_is_database_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docs.db");
        let store = open(&path);
        assert_eq!(store.wal_name(), path.as_path());
    }

    #[test]
    fn test_empty_value_is_stored() -> std::result::Result<(), StoreError> {
        let dir = tempdir().unwrap();
        let store = open(&dir.path().join("test.db"));

        store.set(b"k", b"")?;
        assert_eq!(store.get(b"k")?, Some(Vec::new()));
        Ok(())
    }

    #[test]
    fn test_write_errors_are_classified() {
        let dir = tempdir().unwrap();
        let store = Storage::open_with(
            Config::new(dir.path().join("test.db"))
                .no_sync(true)
                .max_value_size(16),
        )
        .unwrap();

        assert!(matches!(
            store.set(b"", b"v"),
            Err(StoreError::Write(StorageError::EmptyKey))
        ));
        assert!(matches!(
            store.set(b"k", &[0u8; 17]),
            Err(StoreError::Write(StorageError::ValueTooLarge { .. }))
        ));
        assert!(matches!(
            store.set(&[b'k'; MAX_KEY_SIZE + 1], b"v"),
            Err(StoreError::Write(StorageError::KeyTooLarge { .. }))
        ));
    }

    #[test]
    fn test_closed_store_rejects_operations() -> std::result::Result<(), StoreError> {
        let dir = tempdir().unwrap();
        let store = open(&dir.path().join("test.db"));
        store.set(b"a", b"1")?;
        store.close()?;
        store.close()?;

        assert!(store.set(b"a", b"2").unwrap_err().is_closed());
        assert!(store.get(b"a").unwrap_err().is_closed());
        assert!(store.delete(b"a").unwrap_err().is_closed());
        let err = store
            .for_each(|_, _| Ok::<(), std::io::Error>(()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Iteration(StorageError::Closed)));
        Ok(())
    }

    #[test]
    fn test_invalid_bucket_name() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("test.db")).bucket("");
        let err = Storage::open_with(config).err().unwrap();
        assert!(matches!(err, StoreError::Open { .. }));
    }
}
