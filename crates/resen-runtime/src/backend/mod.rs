//! Container runtime abstraction.
//!
//! Everything the bucket core needs from a container engine goes through
//! [`ContainerRuntime`]. The docker CLI backend drives a real engine; the
//! memory backend simulates one for tests.

pub mod docker;
pub mod memory;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use resen_common::error::{ResenError, Result};
use resen_common::types::{
    ContainerId, ContainerStatus, ImageDescriptor, ImageId, PortMapping, StorageMount,
};

use crate::exec::{ExecOutput, ExecRequest};
use crate::progress::{PullProgress, PullTracker};

/// Everything needed to create a bucket's container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name, the bucket name with the container prefix.
    pub name: String,
    /// Image the container is created from.
    pub image: ImageDescriptor,
    /// Command the container runs.
    pub command: Vec<String>,
    /// Whether to allocate a pseudo-terminal.
    pub tty: bool,
    /// Published ports.
    pub ports: Vec<PortMapping>,
    /// Bind mounts.
    pub volumes: Vec<StorageMount>,
}

/// Container engine operations used by the bucket core.
///
/// Calls block until the engine answers or the configured timeout expires.
/// Implementations keep the timeout behind interior mutability so it can be
/// raised temporarily through a shared handle.
pub trait ContainerRuntime: Send + Sync {
    /// Creates a container, returning its identifier and initial status.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the container.
    fn create(&self, spec: &ContainerSpec) -> Result<(ContainerId, ContainerStatus)>;

    /// Starts a container and returns the status reported afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be started.
    fn start(&self, id: &ContainerId) -> Result<ContainerStatus>;

    /// Stops a container and returns the status reported afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be stopped.
    fn stop(&self, id: &ContainerId) -> Result<ContainerStatus>;

    /// Returns the current status of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or reports a status
    /// outside the known set.
    fn status(&self, id: &ContainerId) -> Result<ContainerStatus>;

    /// Runs a command inside a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be launched.
    fn exec(&self, id: &ContainerId, request: &ExecRequest) -> Result<ExecOutput>;

    /// Pulls an image, reporting per-layer progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull fails.
    fn pull(&self, reference: &str, progress: &mut dyn FnMut(&PullProgress)) -> Result<()>;

    /// Tags an image as `repo:tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is unknown.
    fn tag(&self, image: &str, repo: &str, tag: &str) -> Result<()>;

    /// Returns whether an image (by id or reference) is present locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    fn has_image(&self, image: &str) -> Result<bool>;

    /// Commits a container's filesystem as `repo:tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails or times out.
    fn commit(&self, id: &ContainerId, repo: &str, tag: &str) -> Result<ImageId>;

    /// Writes an image tarball into `sink`, returning the bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if the save fails, times out, or `sink` fails.
    fn save(&self, image: &str, sink: &mut dyn Write) -> Result<u64>;

    /// Loads an image tarball (optionally gzip-compressed) from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded.
    fn load(&self, path: &Path) -> Result<ImageId>;

    /// Removes a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be removed.
    fn remove_container(&self, id: &ContainerId) -> Result<()>;

    /// Removes an image by id or reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be removed.
    fn remove_image(&self, image: &str) -> Result<()>;

    /// Disk space used by a container, writable layer plus root filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected.
    fn inspect_size(&self, id: &ContainerId) -> Result<u64>;

    /// Timeout applied to runtime calls.
    fn timeout(&self) -> Duration;

    /// Replaces the timeout applied to runtime calls.
    fn set_timeout(&self, timeout: Duration);

    /// Returns whether the engine can be reached on this host.
    fn is_available(&self) -> bool;
}

/// Shared handle to a runtime.
pub type SharedRuntime = Arc<dyn ContainerRuntime>;

/// Creates the runtime for this host: the docker CLI found on `PATH`.
///
/// # Errors
///
/// Returns an error if no `docker` executable can be found.
pub fn detect_runtime(timeout: Duration) -> Result<SharedRuntime> {
    let runtime = docker::DockerCli::new(timeout)?;
    Ok(Arc::new(runtime))
}

/// Makes sure the image described by `image` is present locally.
///
/// A missing image is pulled by digest, logging aggregated progress at most
/// once per second, and then tagged `org/repo:version` since digest pulls
/// carry no tag.
///
/// # Errors
///
/// Returns `ResenError::Runtime` if the image is missing and has no digest
/// to pull by, or any error from the pull or tag.
pub fn ensure_image(runtime: &dyn ContainerRuntime, image: &ImageDescriptor) -> Result<()> {
    if runtime.has_image(image.image_id.as_str())? {
        tracing::debug!(image = %image.image_id, "image already present");
        return Ok(());
    }
    let Some(reference) = image.pull_reference() else {
        return Err(ResenError::Runtime {
            message: format!(
                "image {} is not present locally and has no digest to pull",
                image.image_id
            ),
        });
    };

    tracing::info!(image = %reference, "pulling image, this may take some time");
    let mut tracker = PullTracker::new();
    runtime.pull(&reference, &mut |event| {
        if tracker.record(event) {
            tracing::info!(progress = %tracker, "pulling {}", reference);
        }
    })?;
    tracing::info!(progress = %tracker, image = %reference, "pull complete");

    runtime.tag(&reference, &image.full_repo(), &image.version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryRuntime;

    fn descriptor(digest: &str) -> ImageDescriptor {
        ImageDescriptor {
            version: "2021.1.0".into(),
            repo: "resen-core".into(),
            org: "earthcubeingeo".into(),
            image_id: ImageId::new("sha256:core"),
            repodigest: digest.into(),
            envpath: None,
        }
    }

    #[test]
    fn present_image_is_not_pulled() {
        let runtime = MemoryRuntime::new().with_image("sha256:core", &[]);
        ensure_image(&runtime, &descriptor("sha256:digest")).expect("ensure");
        assert!(!runtime.calls().iter().any(|c| c.starts_with("pull")));
    }

    #[test]
    fn missing_image_is_pulled_and_tagged() {
        let runtime = MemoryRuntime::new();
        ensure_image(&runtime, &descriptor("sha256:digest")).expect("ensure");
        let calls = runtime.calls();
        assert!(calls.contains(&"pull earthcubeingeo/resen-core@sha256:digest".to_string()));
        assert!(runtime.has_image("earthcubeingeo/resen-core:2021.1.0").expect("query"));
    }

    #[test]
    fn missing_image_without_digest_fails() {
        let runtime = MemoryRuntime::new();
        let err = ensure_image(&runtime, &descriptor("")).unwrap_err();
        assert!(matches!(err, ResenError::Runtime { .. }));
    }
}
