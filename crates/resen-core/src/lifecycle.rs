//! The bucket state machine.
//!
//! A bucket moves Empty → Configured (image, ports, storage) → Created →
//! Running ⇄ Exited and is finally removed. Every operation takes the store
//! explicitly, validates before it mutates, and saves the store before it
//! returns, including when the runtime reports an unexpected result after a
//! change was recorded.

use std::path::Path;
use std::time::Duration;

use resen_common::config::ResenConfig;
use resen_common::constants::{DEFAULT_SUDO_PASSWORD, DEFAULT_USER};
use resen_common::error::{ResenError, Result};
use resen_common::types::{ContainerStatus, PortMapping};
use resen_runtime::backend::{ContainerRuntime, ContainerSpec, SharedRuntime, ensure_image};
use resen_runtime::exec::{ExecOutput, ExecRequest};

use crate::bucket::Bucket;
use crate::catalog::CoreCatalog;
use crate::platform::Platform;
use crate::ports::PortAllocator;
use crate::store::BucketStore;
use crate::storage::StorageValidator;

/// Tunables the lifecycle takes from configuration.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Prefix of container names.
    pub container_prefix: String,
    /// Registry organisation for exported and imported images.
    pub image_org: String,
    /// Runtime timeout while an export commits and saves its image.
    pub export_timeout: Duration,
    /// Delay between process-list checks after a notebook launch.
    pub session_poll_interval: Duration,
    /// Number of process-list checks before a launch counts as failed.
    pub session_poll_attempts: u32,
}

impl LifecycleSettings {
    /// Takes the lifecycle settings out of a configuration.
    #[must_use]
    pub fn from_config(config: &ResenConfig) -> Self {
        Self {
            container_prefix: config.container_prefix.clone(),
            image_org: config.image_org.clone(),
            export_timeout: config.export_timeout,
            session_poll_interval: config.session_poll_interval,
            session_poll_attempts: config.session_poll_attempts,
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_config(&ResenConfig::default())
    }
}

/// Drives buckets through their lifecycle against a container runtime.
pub struct BucketLifecycle {
    runtime: SharedRuntime,
    catalog: CoreCatalog,
    storage: StorageValidator,
    ports: PortAllocator,
    settings: LifecycleSettings,
}

impl std::fmt::Debug for BucketLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketLifecycle")
            .field("catalog", &self.catalog)
            .field("storage", &self.storage)
            .field("ports", &self.ports)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl BucketLifecycle {
    /// Assembles a lifecycle from its parts.
    #[must_use]
    pub const fn new(
        runtime: SharedRuntime,
        catalog: CoreCatalog,
        storage: StorageValidator,
        ports: PortAllocator,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            runtime,
            catalog,
            storage,
            ports,
            settings,
        }
    }

    /// Assembles a lifecycle from configuration and the detected platform.
    #[must_use]
    pub fn from_config(
        config: &ResenConfig,
        runtime: SharedRuntime,
        catalog: CoreCatalog,
        platform: &dyn Platform,
    ) -> Self {
        Self::new(
            runtime,
            catalog,
            StorageValidator::from_config(config, platform),
            PortAllocator::new(config.base_port),
            LifecycleSettings::from_config(config),
        )
    }

    /// The container runtime.
    #[must_use]
    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    /// The core catalog.
    #[must_use]
    pub const fn catalog(&self) -> &CoreCatalog {
        &self.catalog
    }

    /// The core catalog, for refreshing.
    pub const fn catalog_mut(&mut self) -> &mut CoreCatalog {
        &mut self.catalog
    }

    /// The storage rules.
    #[must_use]
    pub const fn storage_validator(&self) -> &StorageValidator {
        &self.storage
    }

    /// The lifecycle settings.
    #[must_use]
    pub const fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Creates an empty bucket.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Config` if the name is taken.
    pub fn create_bucket(&self, store: &mut BucketStore, name: &str) -> Result<()> {
        store.insert(Bucket::new(name))?;
        store.save()?;
        tracing::info!(bucket = name, "bucket created");
        Ok(())
    }

    /// Assigns the core image with the given version.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` once a container exists and
    /// `ResenError::Validation` for a version missing from the catalog.
    pub fn set_image(&self, store: &mut BucketStore, name: &str, version: &str) -> Result<()> {
        let bucket = store.get(name)?;
        if !bucket.is_configurable() {
            return Err(ResenError::State {
                message: format!("bucket \"{name}\" has already been started, cannot set new image"),
            });
        }
        let image = self.catalog.find(version)?.clone();
        store.get_mut(name)?.image = Some(image);
        store.save()?;
        tracing::info!(bucket = name, version, "image assigned");
        Ok(())
    }

    /// Adds a port mapping.
    ///
    /// With neither port given, one free port is allocated and used on both
    /// sides. With only `local`, the container side matches it. With only
    /// `container`, the local side is allocated.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` once a container exists, and
    /// `ResenError::Validation` if either side is already mapped or no port
    /// can be allocated.
    pub fn add_port(
        &self,
        store: &mut BucketStore,
        name: &str,
        local: Option<u16>,
        container: Option<u16>,
        tcp: bool,
    ) -> Result<PortMapping> {
        let bucket = store.get(name)?;
        if !bucket.is_configurable() {
            return Err(ResenError::State {
                message: format!("bucket \"{name}\" has already been started, cannot add port"),
            });
        }

        let (local, container) = match (local, container) {
            (None, None) => {
                let port = self.ports.allocate(&store.assigned_ports())?;
                (port, port)
            }
            (Some(local), None) => (local, local),
            (None, Some(container)) => (self.ports.allocate(&store.assigned_ports())?, container),
            (Some(local), Some(container)) => (local, container),
        };
        if bucket.port.iter().any(|p| p.local == local) {
            return Err(ResenError::Validation {
                message: format!("local port {local} already in use in bucket \"{name}\""),
            });
        }
        if bucket.port.iter().any(|p| p.container == container) {
            return Err(ResenError::Validation {
                message: format!("container port {container} already in use in bucket \"{name}\""),
            });
        }

        let mapping = PortMapping {
            local,
            container,
            tcp,
        };
        store.get_mut(name)?.port.push(mapping);
        store.save()?;
        tracing::info!(bucket = name, local, container, protocol = mapping.protocol(), "port added");
        Ok(mapping)
    }

    /// Removes the port mapping whose local side is `local`.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` once a container exists, and
    /// `ResenError::Validation` if no such mapping exists.
    pub fn remove_port(&self, store: &mut BucketStore, name: &str, local: u16) -> Result<()> {
        let bucket = store.get_mut(name)?;
        if !bucket.is_configurable() {
            return Err(ResenError::State {
                message: format!("bucket \"{name}\" has already been started, cannot remove port {local}"),
            });
        }
        let index = bucket
            .port
            .iter()
            .position(|p| p.local == local)
            .ok_or_else(|| ResenError::Validation {
                message: format!("port {local} is not associated with bucket \"{name}\""),
            })?;
        let _ = bucket.port.remove(index);
        store.save()?;
        tracing::info!(bucket = name, local, "port removed");
        Ok(())
    }

    /// Mounts a host directory into the bucket.
    ///
    /// # Errors
    ///
    /// See [`StorageValidator::add_storage`].
    pub fn add_storage(
        &self,
        store: &mut BucketStore,
        name: &str,
        local: &Path,
        container: &str,
        permission: &str,
    ) -> Result<()> {
        self.storage
            .add_storage(store.get_mut(name)?, local, container, permission)?;
        store.save()
    }

    /// Removes a host directory mount.
    ///
    /// # Errors
    ///
    /// See [`StorageValidator::remove_storage`].
    pub fn remove_storage(&self, store: &mut BucketStore, name: &str, local: &Path) -> Result<()> {
        self.storage.remove_storage(store.get_mut(name)?, local)?;
        store.save()
    }

    /// Creates the bucket's container, pulling its image if needed.
    ///
    /// With `give_sudo`, the container is started once so the default user
    /// can be given sudo rights, then stopped again.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` if no image is assigned or a container
    /// already exists, and any runtime error from the pull or creation.
    pub fn create_container(&self, store: &mut BucketStore, name: &str, give_sudo: bool) -> Result<()> {
        let bucket = store.get(name)?;
        let Some(image) = bucket.image.clone() else {
            return Err(ResenError::State {
                message: format!("bucket \"{name}\" does not have an image assigned to it"),
            });
        };
        if bucket.container.is_some() {
            return Err(ResenError::State {
                message: format!("bucket \"{name}\" already has a container"),
            });
        }
        let spec = ContainerSpec {
            name: format!("{}{name}", self.settings.container_prefix),
            image,
            command: vec!["bash".to_string()],
            tty: true,
            ports: bucket.port.clone(),
            volumes: bucket.storage.clone(),
        };

        ensure_image(self.runtime(), &spec.image)?;
        let (id, status) = self.runtime.create(&spec)?;
        tracing::info!(bucket = name, container = %id, %status, "container created");
        let bucket = store.get_mut(name)?;
        bucket.container = Some(id);
        bucket.status = Some(status);
        store.save()?;

        if give_sudo {
            self.start(store, name)?;
            self.set_sudo(store, name, DEFAULT_SUDO_PASSWORD)?;
            self.stop(store, name)?;
        }
        Ok(())
    }

    /// Starts the bucket's container. Does nothing if it is running.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` if no container exists and
    /// `ResenError::Runtime` if the container is not running afterwards.
    pub fn start(&self, store: &mut BucketStore, name: &str) -> Result<()> {
        self.refresh_statuses(store)?;
        let bucket = store.get(name)?;
        if bucket.is_running() {
            return Ok(());
        }
        let Some(id) = bucket.container.clone() else {
            return Err(ResenError::State {
                message: format!("container for bucket \"{name}\" has not been created yet, cannot start bucket"),
            });
        };

        let status = self.runtime.start(&id)?;
        record_status(store.get_mut(name)?, status);
        store.save()?;
        if status != ContainerStatus::Running {
            return Err(ResenError::Runtime {
                message: format!("failed to start bucket \"{name}\", status is {status}"),
            });
        }
        tracing::info!(bucket = name, "bucket started");
        Ok(())
    }

    /// Stops the bucket's container. Does nothing unless it is running.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Runtime` if the container has not exited
    /// afterwards.
    pub fn stop(&self, store: &mut BucketStore, name: &str) -> Result<()> {
        self.refresh_statuses(store)?;
        let bucket = store.get(name)?;
        if !bucket.is_running() {
            return Ok(());
        }
        let Some(id) = bucket.container.clone() else {
            return Ok(());
        };

        let status = self.runtime.stop(&id)?;
        record_status(store.get_mut(name)?, status);
        store.save()?;
        if status != ContainerStatus::Exited {
            return Err(ResenError::Runtime {
                message: format!("failed to stop bucket \"{name}\", status is {status}"),
            });
        }
        tracing::info!(bucket = name, "bucket stopped");
        Ok(())
    }

    /// Runs a command in the bucket's running container.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` unless the bucket is running, and
    /// `ResenError::Runtime` if a detached command reports an exit code or
    /// an attached command exits non-zero.
    pub fn execute(&self, store: &mut BucketStore, name: &str, request: &ExecRequest) -> Result<ExecOutput> {
        self.refresh_statuses(store)?;
        let bucket = store.get(name)?;
        let (true, Some(id)) = (bucket.is_running(), bucket.container.as_ref()) else {
            return Err(ResenError::State {
                message: format!("bucket \"{name}\" is not running"),
            });
        };

        tracing::debug!(bucket = name, command = %request.display(), user = %request.user, "executing command");
        let output = self.runtime.exec(id, request)?;
        if !output.succeeded(request.detach) {
            return Err(ResenError::Runtime {
                message: format!(
                    "failed to execute command {} (exit code {:?}): {}",
                    request.display(),
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }
        Ok(output)
    }

    /// Gives the default user a password and sudo rights.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub fn set_sudo(&self, store: &mut BucketStore, name: &str, password: &str) -> Result<()> {
        let script = format!(
            r#"echo "{DEFAULT_USER}:{password}" | chpasswd && usermod -aG sudo {DEFAULT_USER} && sed --in-place "s/^#\s*\(%sudo\s\+ALL=(ALL:ALL)\s\+ALL\)/\1/" /etc/sudoers"#
        );
        let request = ExecRequest::bash(script).user("root").tty(true);
        let _ = self.execute(store, name, &request)?;
        tracing::info!(bucket = name, user = DEFAULT_USER, "sudo enabled");
        Ok(())
    }

    /// Removes a bucket together with its container.
    ///
    /// The image is removed as well when no other bucket uses it and it is
    /// known to be local (the bucket had a container or was imported). An
    /// import directory is deleted recursively.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` while the bucket is running, and any
    /// runtime or I/O error from the cleanup.
    pub fn remove_bucket(&self, store: &mut BucketStore, name: &str) -> Result<()> {
        self.refresh_statuses(store)?;
        let bucket = store.get(name)?.clone();
        if bucket.is_running() {
            return Err(ResenError::State {
                message: format!("bucket \"{name}\" is running, cannot remove"),
            });
        }

        let image_is_local = bucket.container.is_some() || bucket.import_dir.is_some();
        let image_to_remove = bucket.image.as_ref().filter(|image| {
            let sharing = store.buckets_sharing_image(&image.image_id, name);
            if !sharing.is_empty() {
                tracing::debug!(bucket = name, shared_with = ?sharing, "image still in use, keeping it");
            }
            image_is_local && sharing.is_empty()
        });

        if let Some(id) = &bucket.container {
            self.runtime.remove_container(id)?;
            let record = store.get_mut(name)?;
            record.container = None;
            record.status = None;
            record.jupyter.clear();
            store.save()?;
        }
        if let Some(image) = image_to_remove {
            if let Err(e) = self.runtime.remove_image(image.image_id.as_str()) {
                tracing::warn!(bucket = name, image = %image.image_id, error = %e, "failed to remove image");
            }
        }
        if let Some(dir) = &bucket.import_dir {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => tracing::debug!(path = %dir.display(), "import directory removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ResenError::Io {
                        path: dir.clone(),
                        source: e,
                    });
                }
            }
        }

        let _ = store.remove(name)?;
        store.save()?;
        tracing::info!(bucket = name, "bucket removed");
        Ok(())
    }

    /// Re-reads the status of every bucket that has a container.
    ///
    /// # Errors
    ///
    /// Returns any runtime error from the status query.
    pub fn refresh_statuses(&self, store: &mut BucketStore) -> Result<()> {
        let mut changed = false;
        for bucket in store.iter_mut() {
            let Some(id) = &bucket.container else {
                continue;
            };
            let status = self.runtime.status(id)?;
            if bucket.status != Some(status) {
                record_status(bucket, status);
                changed = true;
            }
        }
        if changed {
            store.save()?;
        }
        Ok(())
    }
}

/// Stores a runtime-reported status, dropping session fields once the
/// container is no longer running.
fn record_status(bucket: &mut Bucket, status: ContainerStatus) {
    if let Some(previous) = bucket.status {
        if !previous.can_transition_to(status) {
            tracing::warn!(bucket = %bucket.name, from = %previous, to = %status, "unexpected status transition");
        }
    }
    if status != ContainerStatus::Running {
        bucket.jupyter.clear();
    }
    bucket.status = Some(status);
}
