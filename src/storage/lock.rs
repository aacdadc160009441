//! Process-level advisory lock on the database file.
//!
//! Read-write handles take an exclusive lock, read-only handles a shared
//! one. Acquisition polls until the configured timeout elapses; the lock is
//! released explicitly on close and implicitly when the file handle drops.

use crate::error::{Result, StorageError};
use std::fs::File;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

/// Delay between lock attempts
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Acquire the lock on `file`, waiting up to `timeout`.
///
/// A zero timeout makes a single attempt.
pub fn lock_file(file: &File, path: &Path, exclusive: bool, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    let mut logged = false;

    loop {
        if sys::try_lock(file, exclusive)? {
            return Ok(());
        }

        let waited = started.elapsed();
        if waited >= timeout {
            return Err(StorageError::LockTimeout {
                path: path.to_path_buf(),
                waited,
            });
        }

        if !logged {
            debug!(path = %path.display(), exclusive, ?timeout, "database file is locked, waiting");
            logged = true;
        }
        std::thread::sleep(LOCK_RETRY_INTERVAL.min(timeout - waited));
    }
}

/// Release a lock taken by [`lock_file`]
pub fn unlock_file(file: &File) -> io::Result<()> {
    sys::unlock(file)
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub fn try_lock(file: &File, exclusive: bool) -> io::Result<bool> {
        let mode = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
        // SAFETY: flock only reads the descriptor, which `file` keeps open.
        let rc = unsafe { libc::flock(file.as_raw_fd(), mode | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(false),
            _ => Err(err),
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        // SAFETY: as above.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::{LockFileEx, UnlockFile};
    use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, OVERLAPPED};

    const ERROR_LOCK_VIOLATION: i32 = 33;

    pub fn try_lock(file: &File, exclusive: bool) -> io::Result<bool> {
        let mut flags = LOCKFILE_FAIL_IMMEDIATELY;
        if exclusive {
            flags |= LOCKFILE_EXCLUSIVE_LOCK;
        }
        // SAFETY: the handle is owned by `file`; OVERLAPPED is plain data
        // and zeroed is its documented initial state.
        let rc = unsafe {
            let mut overlapped: OVERLAPPED = std::mem::zeroed();
            LockFileEx(file.as_raw_handle() as _, flags, 0, !0, !0, &mut overlapped)
        };
        if rc != 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION) {
            Ok(false)
        } else {
            Err(err)
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        // SAFETY: as above.
        let rc = unsafe { UnlockFile(file.as_raw_handle() as _, 0, 0, !0, !0) };
        if rc != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    fn open(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .unwrap()
    }

    #[test]
    fn test_exclusive_lock_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock.db");

        let holder = open(&path);
        lock_file(&holder, &path, true, Duration::ZERO).unwrap();

        let contender = open(&path);
        let err = lock_file(&contender, &path, true, Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, StorageError::LockTimeout { .. }));

        unlock_file(&holder).unwrap();
        lock_file(&contender, &path, true, Duration::ZERO).unwrap();
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock.db");

        let a = open(&path);
        let b = open(&path);
        lock_file(&a, &path, false, Duration::ZERO).unwrap();
        lock_file(&b, &path, false, Duration::ZERO).unwrap();

        let writer = open(&path);
        assert!(lock_file(&writer, &path, true, Duration::ZERO).is_err());
    }
}
