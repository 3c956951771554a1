//! Bucket export and import.
//!
//! An export is a plain tar holding a gzip-compressed image save
//! (`<bucket>_image.tgz`), one gzip tar per mounted directory
//! (`<dir>_mount.tgz`) and `manifest.json` describing how to put them back
//! together. Import reverses this into a new, unconfigured bucket that
//! still needs ports and a container.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use resen_common::constants::{ARCHIVE_COMPRESSION_LEVEL, MANIFEST_FILE};
use resen_common::error::{ResenError, Result};
use resen_common::types::{ContainerId, ImageDescriptor};
use resen_runtime::backend::ContainerRuntime;
use serde::{Deserialize, Serialize};

use crate::archive;
use crate::bucket::Bucket;
use crate::lifecycle::BucketLifecycle;
use crate::storage::base_permission;
use crate::store::BucketStore;

/// Contents list of an export archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// File name of the image save.
    pub image: String,
    /// Repository the image was committed under, without organisation.
    pub image_repo: String,
    /// Tag the image was committed under.
    pub image_tag: String,
    /// `(archive file, container path, permission)` per exported mount.
    pub mounts: Vec<(String, String, String)>,
}

/// What an export wrote.
#[derive(Debug, Clone)]
pub struct ExportReport {
    /// Final archive path, with the `.tar` extension.
    pub outfile: PathBuf,
    /// Compressed size of the image save.
    pub image_bytes: u64,
    /// Host directories that were archived.
    pub mounts: Vec<PathBuf>,
    /// Size of the final archive.
    pub total_bytes: u64,
}

/// Import settings beyond the bucket name and archive.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Where to unpack; defaults to `resen_<name>` next to the archive.
    pub extract_dir: Option<PathBuf>,
    /// Image repository override.
    pub repo: Option<String>,
    /// Image tag override.
    pub tag: Option<String>,
    /// Delete the extracted image save once it is loaded.
    pub remove_image_file: bool,
}

/// Raises the runtime timeout until dropped.
struct TimeoutOverride<'a> {
    runtime: &'a dyn ContainerRuntime,
    previous: Duration,
}

impl<'a> TimeoutOverride<'a> {
    fn new(runtime: &'a dyn ContainerRuntime, timeout: Duration) -> Self {
        let previous = runtime.timeout();
        runtime.set_timeout(timeout);
        Self { runtime, previous }
    }
}

impl Drop for TimeoutOverride<'_> {
    fn drop(&mut self) {
        self.runtime.set_timeout(self.previous);
    }
}

/// Exports and imports buckets through a lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct Packager<'a> {
    lifecycle: &'a BucketLifecycle,
}

impl<'a> Packager<'a> {
    /// Creates a packager.
    #[must_use]
    pub const fn new(lifecycle: &'a BucketLifecycle) -> Self {
        Self { lifecycle }
    }

    /// Exports a bucket to `outfile` (extension forced to `.tar`).
    ///
    /// Mounts whose host path is in `exclude_mounts` are left out. The
    /// image is committed as `<org>/<repo>:<tag>`, with `repo` defaulting to
    /// the lower-cased bucket name and `tag` to `latest`; the committed
    /// image is removed again whatever happens.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` if the bucket has no container, and any
    /// runtime or I/O error along the way.
    pub fn export(
        &self,
        store: &BucketStore,
        name: &str,
        outfile: &Path,
        exclude_mounts: &[PathBuf],
        repo: Option<&str>,
        tag: Option<&str>,
    ) -> Result<ExportReport> {
        let bucket = store.get(name)?;
        let Some(container) = &bucket.container else {
            return Err(ResenError::State {
                message: format!("bucket \"{name}\" has no container to export"),
            });
        };
        let outfile = outfile.with_extension("tar");
        let validator = self.lifecycle.storage_validator();
        let excluded = exclude_mounts
            .iter()
            .map(|path| validator.resolve_local(path))
            .collect::<Result<HashSet<_>>>()?;
        let repo = repo.map_or_else(|| name.to_lowercase(), str::to_string);
        let tag = tag.unwrap_or("latest");
        let org = bucket
            .image
            .as_ref()
            .map_or_else(|| self.lifecycle.settings().image_org.clone(), |i| i.org.clone());
        let full_repo = format!("{org}/{repo}");
        tracing::info!(bucket = name, outfile = %outfile.display(), image = %format!("{full_repo}:{tag}"), "exporting bucket");

        let scratch = tempfile::Builder::new()
            .prefix("resen-export-")
            .tempdir()
            .map_err(|e| ResenError::Io {
                path: std::env::temp_dir(),
                source: e,
            })?;
        let mut files = Vec::new();

        let image_file = scratch.path().join(format!("{name}_image.tgz"));
        let image_bytes = self.save_image(container, &full_repo, tag, &image_file)?;
        files.push(image_file);

        let mut mounts = Vec::new();
        let mut manifest_mounts = Vec::new();
        let mut used = HashSet::new();
        for mount in bucket.storage.iter().filter(|m| !excluded.contains(&m.local)) {
            let stem = unique_stem(&mount.local, &mut used);
            let mount_file = scratch.path().join(format!("{stem}_mount.tgz"));
            tracing::info!(local = %mount.local.display(), archive = %mount_file.display(), "exporting mount");
            let _ = archive::pack_dir(&mount.local, &stem, &mount_file, ARCHIVE_COMPRESSION_LEVEL)?;
            manifest_mounts.push((
                format!("{stem}_mount.tgz"),
                mount.container.clone(),
                base_permission(&mount.permission).to_string(),
            ));
            mounts.push(mount.local.clone());
            files.push(mount_file);
        }

        let manifest = Manifest {
            image: format!("{name}_image.tgz"),
            image_repo: repo,
            image_tag: tag.to_string(),
            mounts: manifest_mounts,
        };
        let manifest_file = scratch.path().join(MANIFEST_FILE);
        std::fs::write(&manifest_file, serde_json::to_string(&manifest)?).map_err(|e| ResenError::Io {
            path: manifest_file.clone(),
            source: e,
        })?;
        files.push(manifest_file);

        let total_bytes = archive::bundle(&files, &outfile)?;
        tracing::info!(bucket = name, outfile = %outfile.display(), bytes = total_bytes, "bucket exported");
        Ok(ExportReport {
            outfile,
            image_bytes,
            mounts,
            total_bytes,
        })
    }

    /// Commits the container and streams its image, gzip-compressed, into
    /// `dest` under the extended export timeout.
    fn save_image(
        &self,
        container: &ContainerId,
        full_repo: &str,
        tag: &str,
        dest: &Path,
    ) -> Result<u64> {
        let runtime = self.lifecycle.runtime();
        let _timeout = TimeoutOverride::new(runtime, self.lifecycle.settings().export_timeout);

        let image = runtime.commit(container, full_repo, tag)?;
        let reference = format!("{full_repo}:{tag}");
        let saved = write_image(runtime, &reference, dest);
        if let Err(e) = runtime.remove_image(&reference) {
            tracing::warn!(image = %image, error = %e, "failed to remove committed image");
        }
        saved
    }

    /// Imports `archive` as a new bucket called `name`.
    ///
    /// The bucket gets the loaded image and the unpacked mounts, but no
    /// ports and no container.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Config` if the name is taken,
    /// `ResenError::Validation` for an unsafe archive or manifest entry, and
    /// any runtime or I/O error along the way.
    pub fn import(
        &self,
        store: &mut BucketStore,
        name: &str,
        archive_path: &Path,
        options: &ImportOptions,
    ) -> Result<()> {
        if store.contains(name) {
            return Err(ResenError::Config {
                message: format!("bucket \"{name}\" already exists"),
            });
        }
        let extract_dir = match &options.extract_dir {
            Some(dir) => dir.clone(),
            None => default_extract_dir(archive_path, name)?,
        };
        tracing::info!(bucket = name, archive = %archive_path.display(), extract_dir = %extract_dir.display(), "importing bucket");
        let _ = archive::extract(archive_path, &extract_dir)?;

        let manifest_file = extract_dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&manifest_file).map_err(|e| ResenError::Io {
            path: manifest_file.clone(),
            source: e,
        })?;
        let manifest: Manifest = serde_json::from_str(&content)?;

        let settings = self.lifecycle.settings();
        let repo = options.repo.clone().unwrap_or(manifest.image_repo);
        let tag = options.tag.clone().unwrap_or(manifest.image_tag);
        let full_repo = format!("{}/{repo}", settings.image_org);
        let image_file = extract_dir.join(plain_file_name(&manifest.image)?);

        let runtime = self.lifecycle.runtime();
        let image_id = runtime.load(&image_file)?;
        runtime.tag(image_id.as_str(), &full_repo, &tag)?;
        tracing::info!(image = %image_id, reference = %format!("{full_repo}:{tag}"), "image loaded");

        let mut bucket = Bucket::new(name);
        bucket.image = Some(ImageDescriptor {
            version: tag,
            repo,
            org: settings.image_org.clone(),
            image_id,
            repodigest: String::new(),
            envpath: None,
        });

        for (mount_archive, container_path, permission) in &manifest.mounts {
            let mount_file = extract_dir.join(plain_file_name(mount_archive)?);
            let members = archive::extract(&mount_file, &extract_dir)?;
            let root = members
                .first()
                .and_then(|m| m.components().find(|c| matches!(c, Component::Normal(_))))
                .ok_or_else(|| ResenError::Validation {
                    message: format!("mount archive {mount_archive} is empty"),
                })?;
            let local = extract_dir.join(root.as_os_str());
            std::fs::remove_file(&mount_file).map_err(|e| ResenError::Io {
                path: mount_file.clone(),
                source: e,
            })?;
            self.lifecycle
                .storage_validator()
                .add_storage(&mut bucket, &local, container_path, permission)?;
        }
        bucket.import_dir = Some(extract_dir);

        if options.remove_image_file {
            std::fs::remove_file(&image_file).map_err(|e| ResenError::Io {
                path: image_file.clone(),
                source: e,
            })?;
        }

        store.insert(bucket)?;
        store.save()?;
        tracing::info!(bucket = name, "bucket imported");
        Ok(())
    }
}

fn write_image(runtime: &dyn ContainerRuntime, reference: &str, dest: &Path) -> Result<u64> {
    let io_err = |e| ResenError::Io {
        path: dest.to_path_buf(),
        source: e,
    };
    let file = File::create(dest).map_err(io_err)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::new(ARCHIVE_COMPRESSION_LEVEL));
    let _ = runtime.save(reference, &mut encoder)?;
    let mut writer = encoder.finish().map_err(io_err)?;
    writer.flush().map_err(io_err)?;
    Ok(std::fs::metadata(dest).map_err(io_err)?.len())
}

/// Directory name of `local`, suffixed with a counter if already used.
fn unique_stem(local: &Path, used: &mut HashSet<String>) -> String {
    let base = local
        .file_name()
        .map_or_else(|| "mount".to_string(), |n| n.to_string_lossy().into_owned());
    let mut stem = base.clone();
    let mut counter = 1;
    while !used.insert(stem.clone()) {
        stem = format!("{base}_{counter}");
        counter += 1;
    }
    stem
}

/// Rejects manifest entries that are not a single file name.
fn plain_file_name(name: &str) -> Result<&Path> {
    let path = Path::new(name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(path),
        _ => Err(ResenError::Validation {
            message: format!("manifest entry \"{name}\" is not a plain file name"),
        }),
    }
}

fn default_extract_dir(archive_path: &Path, name: &str) -> Result<PathBuf> {
    let absolute = std::path::absolute(archive_path).map_err(|e| ResenError::Io {
        path: archive_path.to_path_buf(),
        source: e,
    })?;
    let parent = absolute.parent().unwrap_or_else(|| Path::new("/"));
    Ok(parent.join(format!("resen_{name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colliding_mount_names_get_suffixes() {
        let mut used = HashSet::new();
        assert_eq!(unique_stem(Path::new("/a/data"), &mut used), "data");
        assert_eq!(unique_stem(Path::new("/b/data"), &mut used), "data_1");
        assert_eq!(unique_stem(Path::new("/c/data"), &mut used), "data_2");
        assert_eq!(unique_stem(Path::new("/c/other"), &mut used), "other");
    }

    #[test]
    fn manifest_entries_must_be_plain_names() {
        assert!(plain_file_name("a_image.tgz").is_ok());
        assert!(plain_file_name("../a_image.tgz").is_err());
        assert!(plain_file_name("/etc/passwd").is_err());
        assert!(plain_file_name("dir/file").is_err());
        assert!(plain_file_name("").is_err());
    }

    #[test]
    fn extract_dir_defaults_next_to_archive() {
        let dir = default_extract_dir(Path::new("/srv/exports/b.tar"), "b").expect("dir");
        assert_eq!(dir, PathBuf::from("/srv/exports/resen_b"));
    }

    #[test]
    fn manifest_uses_nested_arrays() {
        let manifest = Manifest {
            image: "b_image.tgz".into(),
            image_repo: "b".into(),
            image_tag: "latest".into(),
            mounts: vec![("data_mount.tgz".into(), "/home/jovyan/mount/data".into(), "ro".into())],
        };
        let json = serde_json::to_value(&manifest).expect("json");
        assert_eq!(json["mounts"][0][2], "ro");
        assert_eq!(json["image_tag"], "latest");
    }
}
