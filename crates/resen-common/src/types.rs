//! Domain primitive types used across the resen workspace.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ResenError, Result};

/// Runtime-assigned identifier of a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime identifier of a container image (usually `sha256:<hex>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    /// Creates a new image ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime-reported state of a bucket's container.
///
/// A bucket without a container has no status at all (`Option::None`),
/// which is the empty/configured state of the bucket state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container exists but has never been started.
    Created,
    /// Container is running.
    Running,
    /// Container has been stopped.
    Exited,
}

impl ContainerStatus {
    /// Transition table for container status changes.
    ///
    /// Staying in the same status is always allowed; `Running` and
    /// `Exited` cycle freely; nothing returns to `Created`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Created | Self::Running)
                | (Self::Running, Self::Running | Self::Exited)
                | (Self::Exited, Self::Exited | Self::Running)
        )
    }

    /// Returns the lowercase name used on disk and by the runtime.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Exited => "exited",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerStatus {
    type Err = ResenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "exited" => Ok(Self::Exited),
            other => Err(ResenError::Runtime {
                message: format!("unexpected container status \"{other}\""),
            }),
        }
    }
}

/// Host-to-container port binding.
///
/// Persisted as a `[local, container, tcp]` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u16, u16, bool)", into = "(u16, u16, bool)")]
pub struct PortMapping {
    /// Port on the host.
    pub local: u16,
    /// Port inside the container.
    pub container: u16,
    /// `true` for TCP, `false` for UDP.
    pub tcp: bool,
}

impl From<(u16, u16, bool)> for PortMapping {
    fn from((local, container, tcp): (u16, u16, bool)) -> Self {
        Self {
            local,
            container,
            tcp,
        }
    }
}

impl From<PortMapping> for (u16, u16, bool) {
    fn from(p: PortMapping) -> Self {
        (p.local, p.container, p.tcp)
    }
}

impl PortMapping {
    /// Returns the protocol name used in runtime port specs.
    #[must_use]
    pub const fn protocol(&self) -> &'static str {
        if self.tcp { "tcp" } else { "udp" }
    }
}

/// Host directory bound into the container.
///
/// Persisted as a `[local, container, permission]` array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(PathBuf, String, String)", into = "(PathBuf, String, String)")]
pub struct StorageMount {
    /// Directory on the host.
    pub local: PathBuf,
    /// Mount point inside the container.
    pub container: String,
    /// Normalized mount mode (`ro`, `rw`, optionally `,Z` suffixed).
    pub permission: String,
}

impl From<(PathBuf, String, String)> for StorageMount {
    fn from((local, container, permission): (PathBuf, String, String)) -> Self {
        Self {
            local,
            container,
            permission,
        }
    }
}

impl From<StorageMount> for (PathBuf, String, String) {
    fn from(m: StorageMount) -> Self {
        (m.local, m.container, m.permission)
    }
}

/// Full description of a core image assigned to a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Core version, also used as the image tag.
    pub version: String,
    /// Repository name without organisation.
    pub repo: String,
    /// Registry organisation.
    pub org: String,
    /// Runtime image identifier.
    pub image_id: ImageId,
    /// Registry digest used to pull the exact image, empty for imports.
    pub repodigest: String,
    /// Python environment holding the notebook server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envpath: Option<String>,
}

impl ImageDescriptor {
    /// Returns `org/repo`.
    #[must_use]
    pub fn full_repo(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }

    /// Returns the digest-pinned pull reference, if a digest is known.
    #[must_use]
    pub fn pull_reference(&self) -> Option<String> {
        if self.repodigest.is_empty() {
            None
        } else {
            Some(format!("{}@{}", self.full_repo(), self.repodigest))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&Some(ContainerStatus::Exited)).unwrap();
        assert_eq!(json, "\"exited\"");
        let none: Option<ContainerStatus> = serde_json::from_str("null").unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn status_parse_rejects_unknown_values() {
        assert_eq!(
            "running\n".parse::<ContainerStatus>().unwrap(),
            ContainerStatus::Running
        );
        assert!("paused".parse::<ContainerStatus>().is_err());
    }

    #[test]
    fn status_transition_table() {
        use ContainerStatus::{Created, Exited, Running};
        assert!(Created.can_transition_to(Running));
        assert!(Running.can_transition_to(Exited));
        assert!(Exited.can_transition_to(Running));
        assert!(Running.can_transition_to(Running));
        assert!(!Exited.can_transition_to(Created));
        assert!(!Running.can_transition_to(Created));
        assert!(!Created.can_transition_to(Exited));
    }

    #[test]
    fn port_mapping_persists_as_array() {
        let p = PortMapping {
            local: 9000,
            container: 8888,
            tcp: true,
        };
        assert_eq!(serde_json::to_string(&p).unwrap(), "[9000,8888,true]");
        let back: PortMapping = serde_json::from_str("[9001,9001,false]").unwrap();
        assert_eq!(back.local, 9001);
        assert_eq!(back.protocol(), "udp");
    }

    #[test]
    fn storage_mount_persists_as_array() {
        let json = r#"["/data/a","/home/jovyan/mount/a","ro,Z"]"#;
        let m: StorageMount = serde_json::from_str(json).unwrap();
        assert_eq!(m.local, PathBuf::from("/data/a"));
        assert_eq!(m.permission, "ro,Z");
        assert_eq!(serde_json::to_string(&m).unwrap(), json);
    }

    #[test]
    fn image_descriptor_pull_reference_requires_digest() {
        let mut image = ImageDescriptor {
            version: "2021.1.0".into(),
            repo: "resen-core".into(),
            org: "earthcubeingeo".into(),
            image_id: ImageId::new("sha256:abc"),
            repodigest: "sha256:def".into(),
            envpath: None,
        };
        assert_eq!(
            image.pull_reference().as_deref(),
            Some("earthcubeingeo/resen-core@sha256:def")
        );
        image.repodigest.clear();
        assert!(image.pull_reference().is_none());
        assert!(!serde_json::to_string(&image).unwrap().contains("envpath"));
    }
}
