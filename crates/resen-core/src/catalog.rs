//! Known core images.
//!
//! The catalog is every `*.json` file in the cores directory, each holding
//! an array of image descriptors, read in file-name order. `update`
//! replaces `cores.json` with the published list.

use std::path::{Path, PathBuf};

use resen_common::constants::CORES_FILE;
use resen_common::error::{ResenError, Result};
use resen_common::types::ImageDescriptor;

/// Core images a bucket can be assigned.
#[derive(Debug, Clone)]
pub struct CoreCatalog {
    dir: PathBuf,
    url: String,
    cores: Vec<ImageDescriptor>,
}

impl CoreCatalog {
    /// Reads every catalog file in `dir`; a missing directory yields an
    /// empty catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` exists but cannot be listed. Individual
    /// files that fail to parse are skipped with a warning.
    pub fn load(dir: impl Into<PathBuf>, url: impl Into<String>) -> Result<Self> {
        let mut catalog = Self {
            dir: dir.into(),
            url: url.into(),
            cores: Vec::new(),
        };
        catalog.reload()?;
        Ok(catalog)
    }

    /// Like [`load`](Self::load), but downloads the published list first
    /// when the directory does not exist yet. A failed download only logs a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or listed.
    pub fn load_or_fetch(dir: impl Into<PathBuf>, url: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        let first_run = !dir.exists();
        let mut catalog = Self::load(dir, url)?;
        if first_run {
            if let Err(e) = catalog.update() {
                tracing::warn!(error = %e, "could not download the core list");
            }
        }
        Ok(catalog)
    }

    /// Builds a catalog from descriptors, with no directory behind it.
    #[must_use]
    pub fn from_cores(cores: Vec<ImageDescriptor>) -> Self {
        Self {
            dir: PathBuf::new(),
            url: String::new(),
            cores,
        }
    }

    /// All known cores, in catalog order.
    #[must_use]
    pub fn cores(&self) -> &[ImageDescriptor] {
        &self.cores
    }

    /// Known versions, in catalog order.
    #[must_use]
    pub fn versions(&self) -> Vec<&str> {
        self.cores.iter().map(|c| c.version.as_str()).collect()
    }

    /// Looks a core up by version.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Validation` naming the valid versions if
    /// `version` is unknown.
    pub fn find(&self, version: &str) -> Result<&ImageDescriptor> {
        self.cores
            .iter()
            .find(|c| c.version == version)
            .ok_or_else(|| ResenError::Validation {
                message: format!(
                    "invalid resen-core version {version}, valid versions: {}",
                    self.versions().join(", ")
                ),
            })
    }

    /// Downloads the published core list into the catalog directory and
    /// reloads.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Http` if the download fails, or an I/O error
    /// if the file cannot be written.
    pub fn update(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| ResenError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        let dest = self.dir.join(CORES_FILE);
        download_file(&self.url, &dest)?;
        tracing::info!(url = %self.url, path = %dest.display(), "core list updated");
        self.reload()
    }

    fn reload(&mut self) -> Result<()> {
        self.cores = read_catalog_dir(&self.dir)?;
        tracing::debug!(count = self.cores.len(), "core catalog loaded");
        Ok(())
    }
}

fn read_catalog_dir(dir: &Path) -> Result<Vec<ImageDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir).map_err(|e| ResenError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut cores = Vec::new();
    for file in files {
        match read_catalog_file(&file) {
            Ok(mut list) => cores.append(&mut list),
            Err(e) => tracing::warn!(path = %file.display(), error = %e, "skipping unreadable core list"),
        }
    }
    Ok(cores)
}

fn read_catalog_file(path: &Path) -> Result<Vec<ImageDescriptor>> {
    let content = std::fs::read_to_string(path).map_err(|e| ResenError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn download_file(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::blocking::get(url).map_err(|e| ResenError::Http {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    if !response.status().is_success() {
        return Err(ResenError::Http {
            url: url.to_string(),
            message: format!("HTTP {}", response.status()),
        });
    }
    let bytes = response.bytes().map_err(|e| ResenError::Http {
        url: url.to_string(),
        message: format!("failed to read response body: {e}"),
    })?;
    std::fs::write(dest, &bytes).map_err(|e| ResenError::Io {
        path: dest.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORES_A: &str = r#"[
        {"version": "2019.1.0", "repo": "resen-core", "org": "earthcubeingeo",
         "image_id": "sha256:aaa", "repodigest": "sha256:a1", "envpath": "/home/jovyan/envs/py36"}
    ]"#;
    const CORES_B: &str = r#"[
        {"version": "2021.1.0", "repo": "resen-core", "org": "earthcubeingeo",
         "image_id": "sha256:bbb", "repodigest": "sha256:b1", "envpath": "/home/jovyan/envs/py38"}
    ]"#;

    #[test]
    fn missing_directory_is_empty_catalog() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = CoreCatalog::load(dir.path().join("cores"), "").expect("load");
        assert!(catalog.cores().is_empty());
    }

    #[test]
    fn files_are_concatenated_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("b.json"), CORES_B).expect("write");
        std::fs::write(dir.path().join("a.json"), CORES_A).expect("write");
        std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write");
        let catalog = CoreCatalog::load(dir.path(), "").expect("load");
        assert_eq!(catalog.versions(), vec!["2019.1.0", "2021.1.0"]);
    }

    #[test]
    fn malformed_file_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.json"), CORES_A).expect("write");
        std::fs::write(dir.path().join("broken.json"), "[{").expect("write");
        let catalog = CoreCatalog::load(dir.path(), "").expect("load");
        assert_eq!(catalog.cores().len(), 1);
    }

    #[test]
    fn find_rejects_unknown_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.json"), CORES_A).expect("write");
        let catalog = CoreCatalog::load(dir.path(), "").expect("load");
        assert_eq!(
            catalog.find("2019.1.0").expect("find").image_id.as_str(),
            "sha256:aaa"
        );
        let err = catalog.find("1999").unwrap_err();
        assert!(matches!(err, ResenError::Validation { .. }));
        assert!(err.to_string().contains("2019.1.0"));
    }

    #[test]
    fn failed_update_reports_http_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut catalog = CoreCatalog::load(dir.path(), "http://127.0.0.1:1/cores.json").expect("load");
        assert!(matches!(catalog.update().unwrap_err(), ResenError::Http { .. }));
    }
}
