//! The bucket record: unit of persistence and identity.

use std::path::PathBuf;

use resen_common::types::{ContainerId, ContainerStatus, ImageDescriptor, PortMapping, StorageMount};
use serde::{Deserialize, Serialize};

/// Notebook session fields, both set while a session runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JupyterState {
    /// Access token of the running session.
    pub token: Option<String>,
    /// Host port the session is reachable on.
    pub port: Option<u16>,
}

impl JupyterState {
    /// Clears both fields.
    pub fn clear(&mut self) {
        self.token = None;
        self.port = None;
    }
}

/// A named, persisted container environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Unique name, immutable after creation.
    pub name: String,
    /// Assigned core image.
    pub image: Option<ImageDescriptor>,
    /// Runtime container, once created.
    pub container: Option<ContainerId>,
    /// Host-to-container port bindings.
    pub port: Vec<PortMapping>,
    /// Host directory mounts.
    pub storage: Vec<StorageMount>,
    /// Last status reported by the runtime; `None` before creation.
    pub status: Option<ContainerStatus>,
    /// Notebook session.
    pub jupyter: JupyterState,
    /// Directory created by import, removed along with the bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_dir: Option<PathBuf>,
}

impl Bucket {
    /// Creates an empty bucket.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: None,
            container: None,
            port: Vec::new(),
            storage: Vec::new(),
            status: None,
            jupyter: JupyterState::default(),
            import_dir: None,
        }
    }

    /// Whether the bucket's container is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.status, Some(ContainerStatus::Running))
    }

    /// Whether ports and storage may still change (no container yet).
    #[must_use]
    pub const fn is_configurable(&self) -> bool {
        self.status.is_none()
    }
}
