//! Disk manager implementation.
//!
//! The disk manager reads and writes whole pages of the database file and
//! owns the process-level file lock. It abstracts the file I/O behind a
//! trait so the transaction layer does not depend on the concrete file.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::durability::durable_sync;
use crate::storage::lock::{lock_file, unlock_file};
use crate::storage::FileHeader;
use crate::types::{PageId, META_PAGE_COUNT, PAGE_SIZE};
use crate::Config;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Trait for disk I/O operations
pub trait DiskManager: Send + Sync {
    /// Read a data page from disk
    fn read_page(&self, page_id: PageId) -> Result<PageBuf>;

    /// Write a data page to disk
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Write `header` into its meta slot
    fn write_header(&self, header: &FileHeader) -> Result<()>;

    /// Extend the file to hold at least `page_count` pages
    fn grow(&self, page_count: u32) -> Result<()>;

    /// Flush all written pages to stable storage
    fn sync(&self) -> Result<()>;

    /// Path of the database file
    fn path(&self) -> &Path;
}

/// File-based disk manager implementation
pub struct DiskManagerImpl {
    path: PathBuf,
    /// The database file; `None` once closed
    file: RwLock<Option<File>>,
    /// Skip `durable_sync` at commit (tests and bulk loads only)
    no_sync: bool,
    read_only: bool,
}

impl DiskManagerImpl {
    /// Open or create the database file and lock it.
    ///
    /// Returns the disk manager together with the newest valid header.
    /// A new (empty) file gets both meta pages initialized.
    pub fn open(config: &Config) -> Result<(Self, FileHeader)> {
        let path = config.path.clone();
        let file = open_file(config)?;

        lock_file(&file, &path, !config.read_only, config.lock_timeout)?;
        debug!(path = %path.display(), read_only = config.read_only, "acquired file lock");

        let dm = Self {
            path,
            file: RwLock::new(Some(file)),
            no_sync: config.no_sync,
            read_only: config.read_only,
        };

        let len = dm.file_len()?;
        let header = if len == 0 {
            if config.read_only {
                return Err(StorageError::BucketNotFound(config.bucket.clone()));
            }
            dm.initialize()?
        } else {
            let first = dm.read_meta(PageId::new(0))?;
            let second = dm.read_meta(PageId::new(1))?;
            match FileHeader::select(&first, &second) {
                Ok(header) => header,
                // creation never finished: nothing past the meta pages was written
                Err(e) if len <= META_PAGE_COUNT as u64 * PAGE_SIZE as u64 && !config.read_only => {
                    warn!(path = %dm.path.display(), error = %e, "reinitializing incomplete database file");
                    dm.initialize()?
                }
                Err(e) => return Err(e),
            }
        };

        let needed = header.page_count as u64 * PAGE_SIZE as u64;
        if len != 0 && len < needed {
            return Err(StorageError::corruption(format!(
                "file is {} bytes but header expects at least {}",
                len, needed
            )));
        }

        info!(
            path = %dm.path.display(),
            txid = header.txid,
            pages = header.page_count,
            "opened database file"
        );
        Ok((dm, header))
    }

    /// Write the two initial meta pages of a new file
    fn initialize(&self) -> Result<FileHeader> {
        let mut header = FileHeader::new();
        self.write_header(&header)?;
        self.sync()?;
        header.txid = 1;
        self.write_header(&header)?;
        self.sync()?;

        debug!(path = %self.path.display(), "initialized new database file");
        Ok(header)
    }

    /// Read a meta page, zero-filling whatever lies past the end of a
    /// short file
    fn read_meta(&self, slot: PageId) -> Result<PageBuf> {
        let mut buf = PageBuf::new();
        self.with_file(|file| {
            let offset = slot.file_offset(PAGE_SIZE);
            let len = file.metadata()?.len();
            let available = len.saturating_sub(offset).min(PAGE_SIZE as u64) as usize;
            read_at(file, &mut buf[..available], offset)
        })?;
        Ok(buf)
    }

    /// Current length of the file in bytes
    pub fn file_len(&self) -> Result<u64> {
        self.with_file(|file| Ok(file.metadata()?.len()))
    }

    fn with_file<T>(&self, f: impl FnOnce(&File) -> io::Result<T>) -> Result<T> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(f(file)?)
    }

    /// Flush, release the lock and close the file. Later I/O fails with
    /// [`StorageError::Closed`]; closing twice is a no-op.
    ///
    /// The flush runs even with `no_sync`.
    pub fn close(&self) -> Result<()> {
        let Some(file) = self.file.write().take() else {
            return Ok(());
        };
        let synced = if self.read_only {
            Ok(())
        } else {
            durable_sync(&file)
        };
        let unlocked = unlock_file(&file);
        drop(file);
        synced?;
        unlocked?;

        debug!(path = %self.path.display(), "released file lock");
        Ok(())
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.file.read().is_none()
    }
}

impl DiskManager for DiskManagerImpl {
    fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        if page_id.value() < META_PAGE_COUNT {
            return Err(StorageError::invalid_operation(
                "cannot read meta page directly",
            ));
        }

        let mut buf = PageBuf::new();
        let result = self.with_file(|file| read_at(file, &mut buf, page_id.file_offset(PAGE_SIZE)));
        match result {
            Ok(()) => Ok(buf),
            Err(StorageError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(StorageError::PageNotFound(page_id))
            }
            Err(e) => Err(e),
        }
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if page_id.value() < META_PAGE_COUNT {
            return Err(StorageError::invalid_operation(
                "cannot write meta page directly",
            ));
        }

        if data.len() != PAGE_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "page data must be {} bytes, got {}",
                PAGE_SIZE,
                data.len()
            )));
        }

        self.with_file(|file| write_at(file, data, page_id.file_offset(PAGE_SIZE)))
    }

    fn write_header(&self, header: &FileHeader) -> Result<()> {
        let mut buf = PageBuf::new();
        header.write(&mut buf);
        let slot = header.slot();
        self.with_file(|file| write_at(file, &buf, slot.file_offset(PAGE_SIZE)))
    }

    fn grow(&self, page_count: u32) -> Result<()> {
        let needed = page_count as u64 * PAGE_SIZE as u64;
        self.with_file(|file| {
            if file.metadata()?.len() < needed {
                file.set_len(needed)?;
            }
            Ok(())
        })
    }

    fn sync(&self) -> Result<()> {
        if self.no_sync {
            return Ok(());
        }
        self.with_file(durable_sync)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn open_file(config: &Config) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    if !config.read_only {
        options.write(true).create(true).truncate(false);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(config.file_mode);
    }

    Ok(options.open(&config.path)?)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config(path: &Path) -> Config {
        Config::new(path).lock_timeout(Duration::ZERO).no_sync(true)
    }

    #[test]
    fn test_create_new_database() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (dm, header) = DiskManagerImpl::open(&config(&path))?;

        assert_eq!(header.txid, 1);
        assert_eq!(header.page_count, META_PAGE_COUNT);
        assert!(header.root_page.is_none());
        assert_eq!(std::fs::metadata(dm.path())?.len(), 2 * PAGE_SIZE as u64);

        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (dm, _) = DiskManagerImpl::open(&config(&path))?;

        let mut data = vec![0u8; PAGE_SIZE];
        data[0..5].copy_from_slice(b"hello");
        dm.write_page(PageId::new(2), &data)?;

        let read_data = dm.read_page(PageId::new(2))?;
        assert_eq!(&read_data[0..5], b"hello");

        assert!(matches!(
            dm.read_page(PageId::new(9)),
            Err(StorageError::PageNotFound(_))
        ));
        assert!(dm.read_page(PageId::new(1)).is_err());

        dm.grow(6)?;
        assert_eq!(std::fs::metadata(&path)?.len(), 6 * PAGE_SIZE as u64);
        assert_eq!(dm.read_page(PageId::new(5))?[0], 0);

        Ok(())
    }

    #[test]
    fn test_reopen_selects_newest_header() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let (dm, mut header) = DiskManagerImpl::open(&config(&path))?;
            dm.write_page(PageId::new(2), &[7u8; PAGE_SIZE])?;
            header.txid += 1;
            header.page_count = 3;
            header.bucket = "docs".to_string();
            dm.write_header(&header)?;
            dm.sync()?;
            dm.close()?;
        }

        let (dm, header) = DiskManagerImpl::open(&config(&path))?;
        assert_eq!(header.txid, 2);
        assert_eq!(header.page_count, 3);
        assert_eq!(header.bucket, "docs");
        assert_eq!(dm.read_page(PageId::new(2))?[100], 7);

        Ok(())
    }

    #[test]
    fn test_truncated_file_is_rejected() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let (dm, mut header) = DiskManagerImpl::open(&config(&path))?;
            header.txid += 1;
            header.page_count = 10;
            dm.write_header(&header)?;
        }

        assert!(DiskManagerImpl::open(&config(&path)).is_err());
        Ok(())
    }

    #[test]
    fn test_close_rejects_io() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (dm, _) = DiskManagerImpl::open(&config(&path))?;
        dm.close()?;
        dm.close()?;
        assert!(dm.is_closed());
        assert!(matches!(
            dm.read_page(PageId::new(2)),
            Err(StorageError::Closed)
        ));

        // the lock is gone, so a second handle opens immediately
        let (_other, _) = DiskManagerImpl::open(&config(&path))?;
        Ok(())
    }

    #[test]
    fn test_close_flushes_without_sync() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (dm, _) = DiskManagerImpl::open(&config(&path))?;
        dm.write_page(PageId::new(2), &[9u8; PAGE_SIZE])?;
        dm.close()?;

        let bytes = std::fs::read(&path)?;
        assert_eq!(bytes.len(), 3 * PAGE_SIZE);
        assert!(bytes[2 * PAGE_SIZE..].iter().all(|&b| b == 9));

        // read-only handles close without flushing
        let (ro, _) = DiskManagerImpl::open(&config(&path).read_only(true))?;
        ro.close()?;
        Ok(())
    }

    #[test]
    fn test_incomplete_creation_is_redone() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::fs::write(&path, vec![0xEEu8; PAGE_SIZE + 100])?;

        assert!(DiskManagerImpl::open(&config(&path).read_only(true)).is_err());

        let (dm, header) = DiskManagerImpl::open(&config(&path))?;
        assert_eq!(header.txid, 1);
        assert_eq!(header.page_count, META_PAGE_COUNT);
        dm.close()?;

        let (_dm, header) = DiskManagerImpl::open(&config(&path))?;
        assert_eq!(header.txid, 1);
        Ok(())
    }

    #[test]
    fn test_second_writer_times_out() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (_dm, _) = DiskManagerImpl::open(&config(&path))?;
        let err = DiskManagerImpl::open(&config(&path).lock_timeout(Duration::from_millis(100)))
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::LockTimeout { .. }));
        Ok(())
    }
}
