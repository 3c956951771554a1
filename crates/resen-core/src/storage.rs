//! Host storage mounts: validation and permission normalization.
//!
//! Every check runs before the bucket is touched, so a rejected mount leaves
//! the storage list exactly as it was.

use std::path::{Component, Path, PathBuf};

use resen_common::config::ResenConfig;
use resen_common::constants::SELINUX_RELABEL;
use resen_common::error::{ResenError, Result};
use resen_common::types::StorageMount;

use crate::bucket::Bucket;
use crate::platform::Platform;

/// Access mode of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Read-only (`r` or `ro`).
    ReadOnly,
    /// Read-write (`rw`).
    ReadWrite,
}

impl Permission {
    /// Parses a user-supplied token.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Validation` for anything but `r`, `ro`, or `rw`.
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "r" | "ro" => Ok(Self::ReadOnly),
            "rw" => Ok(Self::ReadWrite),
            other => Err(ResenError::Validation {
                message: format!("invalid permission \"{other}\", valid options are r, ro and rw"),
            }),
        }
    }

    /// Normalized token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::ReadWrite => "rw",
        }
    }

    /// Mount option, with the SELinux relabel suffix when requested.
    #[must_use]
    pub fn mount_option(self, relabel: bool) -> String {
        if relabel {
            format!("{},{SELINUX_RELABEL}", self.as_str())
        } else {
            self.as_str().to_string()
        }
    }
}

/// Strips host-specific suffixes such as `,Z` from a stored permission.
#[must_use]
pub fn base_permission(stored: &str) -> &str {
    stored.split(',').next().unwrap_or(stored)
}

/// Applies the mount rules to a bucket's storage list.
#[derive(Debug, Clone)]
pub struct StorageValidator {
    whitelist: Vec<PathBuf>,
    relabel: bool,
    host_path_map: Option<(String, String)>,
}

impl StorageValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new(whitelist: &[String], relabel: bool, host_path_map: Option<(String, String)>) -> Self {
        Self {
            whitelist: whitelist.iter().map(|root| normalize(Path::new(root))).collect(),
            relabel,
            host_path_map,
        }
    }

    /// Creates a validator from configuration and the detected platform.
    #[must_use]
    pub fn from_config(config: &ResenConfig, platform: &dyn Platform) -> Self {
        Self::new(
            &config.storage_whitelist,
            platform.mac_enforcing(),
            config.host_path_map.clone(),
        )
    }

    /// Whether new mounts get the SELinux relabel suffix.
    #[must_use]
    pub const fn relabel(&self) -> bool {
        self.relabel
    }

    /// Rewrites a host path through the configured host-to-VM prefix map.
    #[must_use]
    pub fn map_local(&self, local: &Path) -> PathBuf {
        match &self.host_path_map {
            Some((host, vm)) => {
                let text = local.to_string_lossy();
                text.strip_prefix(host.as_str()).map_or_else(
                    || local.to_path_buf(),
                    |rest| PathBuf::from(format!("{vm}{}", rest.replace('\\', "/"))),
                )
            }
            None => local.to_path_buf(),
        }
    }

    /// Resolves a host path the way it is recorded on a mount: absolute,
    /// lexically normalized, then mapped.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the current directory cannot be read.
    pub fn resolve_local(&self, local: &Path) -> Result<PathBuf> {
        Ok(self.map_local(&absolute(local)?))
    }

    /// Whether `container` is a whitelist root or lies beneath one.
    #[must_use]
    pub fn is_whitelisted(&self, container: &Path) -> bool {
        let container = normalize(container);
        container.is_absolute() && self.whitelist.iter().any(|root| container.starts_with(root))
    }

    /// Validates and appends a mount.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` once the bucket has a container, and
    /// `ResenError::Validation` for a missing host directory, a duplicate
    /// host or container path, a container path outside the whitelist, or
    /// a bad permission token.
    pub fn add_storage(
        &self,
        bucket: &mut Bucket,
        local: &Path,
        container: &str,
        permission: &str,
    ) -> Result<()> {
        if !bucket.is_configurable() {
            return Err(ResenError::State {
                message: format!(
                    "bucket \"{}\" has already been started, cannot add storage {}",
                    bucket.name,
                    local.display()
                ),
            });
        }
        if !local.is_dir() {
            return Err(ResenError::Validation {
                message: format!("cannot find local storage location {}", local.display()),
            });
        }

        let local = self.resolve_local(local)?;
        if bucket.storage.iter().any(|m| m.local == local) {
            return Err(ResenError::Validation {
                message: format!(
                    "local storage location {} already in use in bucket",
                    local.display()
                ),
            });
        }
        let container_path = normalize(Path::new(container));
        let container = container_path.to_string_lossy().into_owned();
        if bucket.storage.iter().any(|m| m.container == container) {
            return Err(ResenError::Validation {
                message: format!("container storage location {container} already in use in bucket"),
            });
        }
        if !self.is_whitelisted(&container_path) {
            let roots: Vec<String> = self
                .whitelist
                .iter()
                .map(|r| r.display().to_string())
                .collect();
            return Err(ResenError::Validation {
                message: format!(
                    "invalid mount location {container}, storage can only be mounted into: {}",
                    roots.join(", ")
                ),
            });
        }
        let permission = Permission::parse(permission)?.mount_option(self.relabel);

        tracing::info!(
            bucket = %bucket.name,
            local = %local.display(),
            container = %container,
            permission = %permission,
            "storage added"
        );
        bucket.storage.push(StorageMount {
            local,
            container,
            permission,
        });
        Ok(())
    }

    /// Removes the mount whose host path is `local`.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` once the bucket has a container, and
    /// `ResenError::Validation` if nothing is mounted from `local`.
    pub fn remove_storage(&self, bucket: &mut Bucket, local: &Path) -> Result<()> {
        if !bucket.is_configurable() {
            return Err(ResenError::State {
                message: format!(
                    "bucket \"{}\" has already been started, cannot remove storage {}",
                    bucket.name,
                    local.display()
                ),
            });
        }
        let mapped = self.resolve_local(local)?;
        let index = bucket
            .storage
            .iter()
            .position(|m| m.local == mapped)
            .ok_or_else(|| ResenError::Validation {
                message: format!(
                    "storage location {} is not associated with bucket \"{}\"",
                    local.display(),
                    bucket.name
                ),
            })?;
        let removed = bucket.storage.remove(index);
        tracing::info!(bucket = %bucket.name, local = %removed.local.display(), "storage removed");
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .map(|p| normalize(&p))
        .map_err(|e| ResenError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Lexically resolves `.` and `..` components.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
