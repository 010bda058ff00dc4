//! Daemon boot lock: prevents two `keeld` processes from sharing one root.
//!
//! Uses an advisory `flock` on `<root>/.lock`, acquired exclusively before
//! anything else touches the daemon root, released automatically (or
//! explicitly, for clarity) when the guard drops.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use keel_shared::errors::{EngineError, EngineResult};

#[derive(Debug)]
pub struct DaemonLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl DaemonLock {
    pub fn acquire(home_dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(home_dir)?;
        let lock_path = home_dir.join(".lock");

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

        if result != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Err(EngineError::StateConflict(format!(
                    "another keeld is already using directory: {}",
                    home_dir.display()
                )));
            }
            return Err(EngineError::Internal(format!(
                "failed to acquire daemon lock: {err}"
            )));
        }

        tracing::debug!(lock_path = %lock_path.display(), "acquired daemon lock");
        Ok(Self {
            file,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        let fd = self.file.as_raw_fd();
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
        tracing::debug!(lock_path = %self.path.display(), "released daemon lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_lock_file() {
        let tmp = TempDir::new().unwrap();
        let lock = DaemonLock::acquire(tmp.path()).unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn second_acquire_in_same_dir_fails() {
        let tmp = TempDir::new().unwrap();
        let _lock1 = DaemonLock::acquire(tmp.path()).unwrap();
        let result = DaemonLock::acquire(tmp.path());
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("already using directory")
        );
    }

    #[test]
    fn lock_released_on_drop() {
        let tmp = TempDir::new().unwrap();
        {
            let _lock = DaemonLock::acquire(tmp.path()).unwrap();
        }
        let _lock2 = DaemonLock::acquire(tmp.path()).unwrap();
    }
}
