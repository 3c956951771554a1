//! Single-instance lock on the configuration directory.
//!
//! The lock file holds the pid of the owning process. A file whose pid is
//! no longer alive, or cannot be parsed, is stale and gets overwritten.

use std::path::{Path, PathBuf};

use resen_common::error::{ResenError, Result};

use crate::platform::Platform;

/// Acquires and clears the lock file at a fixed path.
#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    /// Creates a manager for the lock file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes the lock for the current process.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Lock` if a live process holds it, or an I/O
    /// error if the file cannot be read or written.
    pub fn acquire(&self, platform: &dyn Platform) -> Result<LockGuard> {
        self.acquire_for(std::process::id(), platform)
    }

    /// Takes the lock on behalf of `pid`.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn acquire_for(&self, pid: u32, platform: &dyn Platform) -> Result<LockGuard> {
        if let Some(holder) = self.holder()? {
            if platform.process_alive(holder) {
                return Err(ResenError::Lock {
                    pid: holder,
                    path: self.path.clone(),
                });
            }
            tracing::warn!(pid = holder, path = %self.path.display(), "removing stale lock");
        }

        std::fs::write(&self.path, pid.to_string()).map_err(|e| ResenError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        tracing::debug!(pid, path = %self.path.display(), "lock acquired");
        Ok(LockGuard {
            path: self.path.clone(),
            released: false,
        })
    }

    /// Pid recorded in the lock file, if it exists and parses.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn holder(&self) -> Result<Option<u32>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ResenError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Removes the lock file without a guard, as the interrupt handler does.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn force_release(&self) -> Result<()> {
        remove_lock_file(&self.path)
    }
}

/// Held lock; dropping it removes the lock file.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Path of the held lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock now, reporting failures that `Drop` would swallow.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        remove_lock_file(&self.path)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = remove_lock_file(&self.path) {
                tracing::warn!(error = %e, "failed to remove lock file");
            }
        }
    }
}

fn remove_lock_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "lock released");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ResenError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{FixedPlatform, HostPlatform};

    fn alive(pids: &[u32]) -> FixedPlatform {
        FixedPlatform {
            alive: pids.to_vec(),
            enforcing: false,
        }
    }

    #[test]
    fn acquire_writes_pid_and_drop_removes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LockManager::new(dir.path().join("lock"));
        {
            let _guard = manager.acquire_for(100, &alive(&[])).expect("acquire");
            assert_eq!(manager.holder().expect("holder"), Some(100));
        }
        assert!(!manager.path().exists());
    }

    #[test]
    fn live_holder_blocks_second_instance() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LockManager::new(dir.path().join("lock"));
        let _first = manager.acquire_for(100, &alive(&[])).expect("first");

        let err = manager.acquire_for(200, &alive(&[100])).unwrap_err();
        assert!(matches!(err, ResenError::Lock { pid: 100, .. }));
        assert_eq!(manager.holder().expect("holder"), Some(100));
    }

    #[test]
    fn dead_holder_is_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LockManager::new(dir.path().join("lock"));
        std::fs::write(manager.path(), "100").expect("write");

        let _guard = manager.acquire_for(200, &alive(&[])).expect("acquire");
        assert_eq!(manager.holder().expect("holder"), Some(200));
    }

    #[test]
    fn unparsable_lock_is_stale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LockManager::new(dir.path().join("lock"));
        std::fs::write(manager.path(), "garbage").expect("write");
        let _guard = manager.acquire_for(7, &alive(&[])).expect("acquire");
    }

    #[test]
    fn release_tolerates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LockManager::new(dir.path().join("lock"));
        let guard = manager.acquire_for(1, &alive(&[])).expect("acquire");
        manager.force_release().expect("force release");
        guard.release().expect("release");
    }

    #[test]
    fn host_platform_sees_current_process_as_holder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LockManager::new(dir.path().join("lock"));
        let platform = HostPlatform::detect();
        let _guard = manager.acquire(&platform).expect("acquire");
        assert!(matches!(
            manager.acquire(&platform).unwrap_err(),
            ResenError::Lock { .. }
        ));
    }
}
