use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Advisory exclusive lock guarding a store directory against concurrent
/// processes. The lock file holds the owning process ID for debugging.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Creates the lock file if needed and acquires an exclusive lock on it.
    /// Fails immediately if another process holds the lock.
    pub fn lock<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Self::try_lock(&file)?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(windows)]
    fn try_lock(file: &File) -> io::Result<()> {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::LockFileEx;
        use winapi::um::winnt::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};

        let handle = file.as_raw_handle();
        let result = unsafe {
            LockFileEx(
                handle as *mut _,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                !0,
                !0,
                std::ptr::null_mut(),
            )
        };

        if result == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // No advisory locking on this platform; allow the open to proceed.
        Ok(())
    }

    /// Releases the lock. The lock file itself is left in place; removing it
    /// would race with another process acquiring it.
    pub fn unlock(self) -> io::Result<()> {
        Ok(())
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // The OS releases the lock when the file handle closes.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;
    use std::fs;

    #[test]
    fn test_lock_writes_pid() {
        let dir = TempDir::new().expect("temp dir");
        let lock_path = dir.path().join("store.lock");

        let lock = FileLock::lock(&lock_path).expect("failed to acquire lock");
        assert_eq!(lock.path(), lock_path.as_path());

        let content = fs::read_to_string(&lock_path).expect("failed to read lock file");
        assert!(content.contains(&std::process::id().to_string()));

        lock.unlock().expect("failed to release lock");
    }

    #[test]
    fn test_second_lock_fails() {
        let dir = TempDir::new().expect("temp dir");
        let lock_path = dir.path().join("store.lock");

        let _held = FileLock::lock(&lock_path).expect("failed to acquire first lock");
        assert!(FileLock::lock(&lock_path).is_err());
    }

    #[test]
    fn test_reacquire_after_drop() {
        let dir = TempDir::new().expect("temp dir");
        let lock_path = dir.path().join("store.lock");

        {
            let _lock = FileLock::lock(&lock_path).expect("failed to acquire lock");
            assert!(lock_path.exists());
        }

        let _lock = FileLock::lock(&lock_path).expect("lock should be free after drop");
    }
}
