//! Disk space used by a bucket.

use std::path::{Path, PathBuf};

use resen_common::error::{ResenError, Result};

use crate::lifecycle::BucketLifecycle;
use crate::store::BucketStore;

/// Space taken by a bucket's container and mounted directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskUsage {
    /// Container size reported by the runtime, if a container exists.
    pub container: Option<u64>,
    /// Size of each mounted host directory.
    pub storage: Vec<(PathBuf, u64)>,
}

impl DiskUsage {
    /// Sum of the mounted directory sizes.
    #[must_use]
    pub fn total_storage(&self) -> u64 {
        self.storage.iter().map(|(_, size)| size).sum()
    }

    /// Container plus storage.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.container.unwrap_or(0) + self.total_storage()
    }
}

/// Total size of the regular files under `path`. Symlinks are counted by
/// their own size and never followed.
///
/// # Errors
///
/// Returns an I/O error if an entry cannot be inspected.
pub fn dir_size(path: &Path) -> Result<u64> {
    let io_err = |e| ResenError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let meta = std::fs::symlink_metadata(path).map_err(io_err)?;
    if !meta.is_dir() {
        return Ok(meta.len());
    }
    let mut total = 0;
    for entry in std::fs::read_dir(path).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        total += dir_size(&entry.path())?;
    }
    Ok(total)
}

impl BucketLifecycle {
    /// Measures the space used by a bucket.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Config` for an unknown bucket, and any runtime or
    /// I/O error from the measurement.
    pub fn disk_usage(&self, store: &BucketStore, name: &str) -> Result<DiskUsage> {
        let bucket = store.get(name)?;
        let container = bucket
            .container
            .as_ref()
            .map(|id| self.runtime().inspect_size(id))
            .transpose()?;
        let storage = bucket
            .storage
            .iter()
            .map(|m| dir_size(&m.local).map(|size| (m.local.clone(), size)))
            .collect::<Result<Vec<_>>>()?;
        Ok(DiskUsage { container, storage })
    }
}
