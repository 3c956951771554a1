//! One open configuration directory.

use resen_common::config::ResenConfig;
use resen_common::error::Result;
use resen_runtime::backend::{SharedRuntime, detect_runtime};

use crate::catalog::CoreCatalog;
use crate::lifecycle::BucketLifecycle;
use crate::lock::{LockGuard, LockManager};
use crate::packager::Packager;
use crate::platform::{HostPlatform, Platform};
use crate::store::BucketStore;

/// The lock, the bucket store, and the lifecycle for one configuration
/// directory. The lock is held until the handle is closed or dropped.
#[derive(Debug)]
pub struct Resen {
    config: ResenConfig,
    store: BucketStore,
    lifecycle: BucketLifecycle,
    lock: LockGuard,
}

impl Resen {
    /// Opens `config` on this host with the docker runtime.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Lock` if another instance is running, and any
    /// error from loading the store or locating the runtime.
    pub fn open(config: ResenConfig) -> Result<Self> {
        let platform = HostPlatform::detect();
        config.ensure_config_dir()?;
        let lock = LockManager::new(config.lock_file()).acquire(&platform)?;
        let catalog = CoreCatalog::load_or_fetch(config.cores_dir(), config.core_list_url.clone())?;
        let runtime = detect_runtime(config.runtime_timeout)?;
        Self::assemble(config, lock, catalog, runtime, &platform)
    }

    /// Opens `config` against the given runtime and platform, without
    /// touching the network.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), minus runtime detection.
    pub fn open_with(config: ResenConfig, runtime: SharedRuntime, platform: &dyn Platform) -> Result<Self> {
        config.ensure_config_dir()?;
        let lock = LockManager::new(config.lock_file()).acquire(platform)?;
        let catalog = CoreCatalog::load(config.cores_dir(), config.core_list_url.clone())?;
        Self::assemble(config, lock, catalog, runtime, platform)
    }

    fn assemble(
        config: ResenConfig,
        lock: LockGuard,
        catalog: CoreCatalog,
        runtime: SharedRuntime,
        platform: &dyn Platform,
    ) -> Result<Self> {
        let store = BucketStore::load(config.buckets_file())?;
        let lifecycle = BucketLifecycle::from_config(&config, runtime, catalog, platform);
        tracing::debug!(
            config_dir = %config.config_dir.display(),
            buckets = store.len(),
            "resen opened"
        );
        Ok(Self {
            config,
            store,
            lifecycle,
            lock,
        })
    }

    /// The resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &ResenConfig {
        &self.config
    }

    /// The bucket store.
    #[must_use]
    pub const fn store(&self) -> &BucketStore {
        &self.store
    }

    /// The lifecycle.
    #[must_use]
    pub const fn lifecycle(&self) -> &BucketLifecycle {
        &self.lifecycle
    }

    /// The lifecycle together with the store it operates on.
    pub const fn split(&mut self) -> (&mut BucketLifecycle, &mut BucketStore) {
        (&mut self.lifecycle, &mut self.store)
    }

    /// A packager over this handle's lifecycle.
    #[must_use]
    pub const fn packager(&self) -> Packager<'_> {
        Packager::new(&self.lifecycle)
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be removed.
    pub fn close(self) -> Result<()> {
        self.lock.release()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use resen_common::error::ResenError;
    use resen_runtime::backend::memory::MemoryRuntime;

    use super::*;
    use crate::platform::FixedPlatform;

    #[test]
    fn second_open_fails_while_holder_is_alive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ResenConfig::with_config_dir(dir.path());
        let platform = FixedPlatform {
            alive: vec![std::process::id()],
            enforcing: false,
        };
        let first = Resen::open_with(config.clone(), Arc::new(MemoryRuntime::new()), &platform).expect("open");
        let err = Resen::open_with(config.clone(), Arc::new(MemoryRuntime::new()), &platform).unwrap_err();
        assert!(matches!(err, ResenError::Lock { .. }));

        first.close().expect("close");
        let again = Resen::open_with(config, Arc::new(MemoryRuntime::new()), &platform).expect("reopen");
        assert!(again.store().is_empty());
    }

    #[test]
    fn split_persists_through_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ResenConfig::with_config_dir(dir.path());
        let platform = FixedPlatform::default();
        let mut resen = Resen::open_with(config.clone(), Arc::new(MemoryRuntime::new()), &platform).expect("open");
        let (lifecycle, store) = resen.split();
        lifecycle.create_bucket(store, "a").expect("create");
        drop(resen);

        let reopened = Resen::open_with(config, Arc::new(MemoryRuntime::new()), &platform).expect("reopen");
        assert!(reopened.store().contains("a"));
    }
}
