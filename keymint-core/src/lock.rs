//! Per-directory advisory locking.
//!
//! Convergence runs from several processes (or several hosts sharing a
//! filesystem) may target the same key directory. Without serialisation,
//! two runs can both observe a missing private key, both invoke the
//! generator, and interleave registry appends. [`DirLock`] closes that gap:
//! an exclusive `flock` on a lock file inside the directory, held across
//! the whole check-then-generate-then-register sequence and released when
//! the guard drops.
//!
//! On non-Unix platforms acquiring the lock only creates the file; the
//! invocation itself is single-threaded, so runs proceed unserialised
//! there rather than failing.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::Error;

/// Name of the lock file inside a key directory.
pub const LOCK_FILE: &str = ".keymint.lock";

/// An exclusive advisory lock on one key directory.
///
/// Blocks until the lock is granted. Released on drop.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<Self, Error> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::io(format!("unable to open lock file {}", path.display()), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if ret != 0 {
                return Err(Error::io(
                    format!("unable to lock {}", path.display()),
                    std::io::Error::last_os_error(),
                ));
            }
        }

        debug!(path = %path.display(), "acquired directory lock");
        Ok(Self { file, path })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let _ = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        }
        debug!(path = %self.path.display(), "released directory lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_creates_the_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DirLock::acquire(dir.path()).unwrap();
        assert!(dir.path().join(LOCK_FILE).exists());
        drop(lock);
    }

    #[test]
    fn reacquire_after_drop_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        drop(DirLock::acquire(dir.path()).unwrap());
        drop(DirLock::acquire(dir.path()).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn lock_excludes_a_second_holder() {
        use std::os::unix::io::AsRawFd;

        let dir = tempfile::tempdir().unwrap();
        let held = DirLock::acquire(dir.path()).unwrap();

        // A non-blocking attempt from a second descriptor must fail while
        // the first lock is held, and succeed once it is released.
        let probe = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.path().join(LOCK_FILE))
            .unwrap();
        let busy = unsafe { libc::flock(probe.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_eq!(busy, -1);

        drop(held);
        let free = unsafe { libc::flock(probe.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_eq!(free, 0);
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirLock::acquire(&dir.path().join("nonexistent")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
