//! Exclusive advisory lock on the job directory's `.lock` file, acquired
//! before any other write to the job directory.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use objsh_core::error::{Error, Kind};

/// An exclusive, advisory lock on a job directory. Released automatically
/// on drop (covers normal return, `?`-propagated error, and panic
/// unwinding); a cancellation-driven exit still runs destructors, so no
/// extra signal plumbing is needed here.
pub struct JobLock {
    _file: File,
}

impl JobLock {
    /// Opens (creating if absent) `path` and acquires an exclusive,
    /// non-blocking lock. Returns [`Kind::Fatal`] if another process
    /// already holds it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::new(Kind::Fatal, "failed to open job lock file").with_cause(e))?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            return Err(Error::new(
                Kind::Fatal,
                "job directory is locked by another process",
            ));
        }
        Ok(Self { _file: file })
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        let _ = unsafe { libc::flock(self._file.as_raw_fd(), libc::LOCK_UN) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquisition_in_the_same_process_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let first = JobLock::acquire(&path).unwrap();
        let second = JobLock::acquire(&path);
        assert!(second.is_err());
        drop(first);
        assert!(JobLock::acquire(&path).is_ok());
    }

    #[test]
    fn release_on_drop_allows_reacquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        {
            let _lock = JobLock::acquire(&path).unwrap();
        }
        assert!(JobLock::acquire(&path).is_ok());
    }
}
