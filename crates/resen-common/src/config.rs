//! Global configuration model for resen.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{ResenError, Result};

/// Root configuration for a resen instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResenConfig {
    /// Directory holding the bucket store, lock file, and core catalog.
    pub config_dir: PathBuf,
    /// Parent directory for bucket imports chosen by the CLI.
    pub home_dir: PathBuf,
    /// Container paths storage may be mounted under.
    pub storage_whitelist: Vec<String>,
    /// First port tried by the port allocator.
    pub base_port: u16,
    /// Prefix of container names created for buckets.
    pub container_prefix: String,
    /// Registry organisation used when tagging exported and imported images.
    pub image_org: String,
    /// URL the core catalog is refreshed from.
    pub core_list_url: String,
    /// Timeout for ordinary runtime calls.
    pub runtime_timeout: Duration,
    /// Timeout for committing and saving an image during export.
    pub export_timeout: Duration,
    /// Host prefix rewritten to a VM prefix before local paths are stored
    /// (Docker Toolbox style setups).
    pub host_path_map: Option<(String, String)>,
    /// Delay between process-list checks after launching a notebook server.
    pub session_poll_interval: Duration,
    /// Number of process-list checks before a launch counts as failed.
    pub session_poll_attempts: u32,
}

impl Default for ResenConfig {
    fn default() -> Self {
        Self {
            config_dir: constants::default_config_dir(),
            home_dir: constants::default_home_dir(),
            storage_whitelist: constants::DEFAULT_STORAGE_WHITELIST
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            base_port: constants::DEFAULT_BASE_PORT,
            container_prefix: constants::CONTAINER_PREFIX.to_string(),
            image_org: constants::IMAGE_ORG.to_string(),
            core_list_url: constants::CORE_LIST_URL.to_string(),
            runtime_timeout: constants::DEFAULT_RUNTIME_TIMEOUT,
            export_timeout: constants::EXPORT_TIMEOUT,
            host_path_map: None,
            session_poll_interval: Duration::from_millis(100),
            session_poll_attempts: 30,
        }
    }
}

impl ResenConfig {
    /// Creates a configuration rooted at the given directory.
    #[must_use]
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            ..Self::default()
        }
    }

    /// Path of the bucket store document.
    #[must_use]
    pub fn buckets_file(&self) -> PathBuf {
        self.config_dir.join(constants::BUCKETS_FILE)
    }

    /// Path of the single-instance lock file.
    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.config_dir.join(constants::LOCK_FILE)
    }

    /// Directory holding core catalog files.
    #[must_use]
    pub fn cores_dir(&self) -> PathBuf {
        self.config_dir.join(constants::CORES_DIR)
    }

    /// Creates the configuration directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure_config_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir).map_err(|e| ResenError::Io {
            path: self.config_dir.clone(),
            source: e,
        })?;
        tracing::debug!(path = %self.config_dir.display(), "configuration directory ready");
        Ok(())
    }
}

/// Checks a bucket name against the naming rules.
///
/// Names start with an ASCII letter, contain no whitespace, and are at most
/// [`MAX_BUCKET_NAME_LEN`](constants::MAX_BUCKET_NAME_LEN) characters long.
///
/// # Errors
///
/// Returns `ResenError::Validation` describing the first rule broken.
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        return Err(ResenError::Validation {
            message: "bucket name cannot be empty".into(),
        });
    };
    if !first.is_ascii_alphabetic() {
        return Err(ResenError::Validation {
            message: format!("bucket name \"{name}\" must start with a letter"),
        });
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ResenError::Validation {
            message: format!("bucket name \"{name}\" cannot contain spaces"),
        });
    }
    if name.chars().count() > constants::MAX_BUCKET_NAME_LEN {
        return Err(ResenError::Validation {
            message: format!(
                "bucket name \"{name}\" is longer than {} characters",
                constants::MAX_BUCKET_NAME_LEN
            ),
        });
    }
    Ok(())
}
