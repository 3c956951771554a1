//! System-wide constants and default paths.

use std::path::PathBuf;
use std::time::Duration;

/// Application name used for directories and log output.
pub const APP_NAME: &str = "resen";

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "RESEN_CONFIG_DIR";

/// Bucket store file name inside the configuration directory.
pub const BUCKETS_FILE: &str = "buckets.json";

/// Single-instance lock file name inside the configuration directory.
pub const LOCK_FILE: &str = "lock";

/// Directory holding core catalog JSON files.
pub const CORES_DIR: &str = "cores";

/// File name the catalog update writes into [`CORES_DIR`].
pub const CORES_FILE: &str = "cores.json";

/// Published list of core images.
pub const CORE_LIST_URL: &str =
    "https://raw.githubusercontent.com/EarthCubeInGeo/resen-core/master/cores.json";

/// First port tried by the port allocator.
pub const DEFAULT_BASE_PORT: u16 = 9000;

/// Container paths storage may be mounted under.
pub const DEFAULT_STORAGE_WHITELIST: &[&str] = &["/home/jovyan/mount"];

/// Prefix of container names created for buckets.
pub const CONTAINER_PREFIX: &str = "resen_";

/// Registry organisation imported images are tagged under.
pub const IMAGE_ORG: &str = "earthcubeingeo";

/// Notebook environment used when the image descriptor has none.
pub const DEFAULT_ENVPATH: &str = "/home/jovyan/envs/py36";

/// Default user for commands run inside a bucket.
pub const DEFAULT_USER: &str = "jovyan";

/// Password given to the default user when sudo is set up.
pub const DEFAULT_SUDO_PASSWORD: &str = "ganimede";

/// Mount option suffix requesting an SELinux relabel.
pub const SELINUX_RELABEL: &str = "Z";

/// Utility reporting the SELinux mode.
pub const GETENFORCE_PATH: &str = "/usr/sbin/getenforce";

/// Default timeout for container runtime calls.
pub const DEFAULT_RUNTIME_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout used while an image is committed and saved during export.
pub const EXPORT_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24);

/// Manifest file name inside an export archive.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Gzip level for image and mount archives; speed matters more than size.
pub const ARCHIVE_COMPRESSION_LEVEL: u32 = 1;

/// Maximum bucket name length accepted by [`validate_bucket_name`](crate::config::validate_bucket_name).
pub const MAX_BUCKET_NAME_LEN: usize = 20;

/// Returns the configuration directory, honouring [`CONFIG_DIR_ENV`].
///
/// Falls back to `%APPDATA%`, then `$XDG_CONFIG_HOME`, then
/// `$HOME/.config`, each joined with [`APP_NAME`].
#[must_use]
pub fn default_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let config_home = std::env::var("APPDATA")
        .or_else(|_| std::env::var("XDG_CONFIG_HOME"))
        .map_or_else(
            |_| {
                std::env::var("HOME")
                    .or_else(|_| std::env::var("USERPROFILE"))
                    .map_or_else(|_| PathBuf::from("."), PathBuf::from)
                    .join(".config")
            },
            PathBuf::from,
        );
    config_home.join(APP_NAME)
}

/// Returns `$HOME/resen`, the default parent of import directories.
#[must_use]
pub fn default_home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_or_else(|_| PathBuf::from("."), PathBuf::from)
        .join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_ends_with_app_name() {
        if std::env::var(CONFIG_DIR_ENV).is_err() {
            assert!(default_config_dir().ends_with(APP_NAME));
        }
    }

    #[test]
    fn export_timeout_outlasts_default() {
        assert!(EXPORT_TIMEOUT > DEFAULT_RUNTIME_TIMEOUT);
    }
}
