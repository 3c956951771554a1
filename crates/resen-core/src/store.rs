//! Bucket collection backed by a single JSON document.
//!
//! The whole collection is loaded at startup and written back in full after
//! every mutation. There is no file locking here; single-writer access is
//! the job of [`crate::lock`].

use std::path::{Path, PathBuf};

use resen_common::error::{ResenError, Result};
use resen_common::types::{ImageId, PortMapping};

use crate::bucket::Bucket;

/// Ordered, name-unique collection of buckets.
#[derive(Debug)]
pub struct BucketStore {
    path: PathBuf,
    buckets: Vec<Bucket>,
}

impl BucketStore {
    /// Loads the store from `path`, starting empty if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let buckets = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ResenError::Io {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_str(&content)?
        } else {
            Vec::new()
        };
        tracing::debug!(path = %path.display(), count = buckets.len(), "bucket store loaded");
        Ok(Self { path, buckets })
    }

    /// Overwrites the store document with the current collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.buckets)?;
        std::fs::write(&self.path, json).map_err(|e| ResenError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        tracing::debug!(path = %self.path.display(), count = self.buckets.len(), "bucket store saved");
        Ok(())
    }

    /// Path of the store document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the bucket called `name`.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Config` if no such bucket exists.
    pub fn get(&self, name: &str) -> Result<&Bucket> {
        self.buckets
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| unknown_bucket(name))
    }

    /// Returns the bucket called `name` for in-place mutation.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Config` if no such bucket exists.
    pub fn get_mut(&mut self, name: &str) -> Result<&mut Bucket> {
        self.buckets
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| unknown_bucket(name))
    }

    /// Whether a bucket called `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.buckets.iter().any(|b| b.name == name)
    }

    /// Appends a bucket.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Config` if the name is already taken.
    pub fn insert(&mut self, bucket: Bucket) -> Result<()> {
        if self.contains(&bucket.name) {
            return Err(ResenError::Config {
                message: format!("bucket \"{}\" already exists", bucket.name),
            });
        }
        self.buckets.push(bucket);
        Ok(())
    }

    /// Removes and returns the bucket called `name`.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Config` if no such bucket exists.
    pub fn remove(&mut self, name: &str) -> Result<Bucket> {
        let index = self
            .buckets
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| unknown_bucket(name))?;
        Ok(self.buckets.remove(index))
    }

    /// Bucket names in store order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.buckets.iter().map(|b| b.name.clone()).collect()
    }

    /// Iterates over buckets in store order.
    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    /// Iterates mutably over buckets in store order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Bucket> {
        self.buckets.iter_mut()
    }

    /// Number of buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the store holds no buckets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Every local port recorded on any bucket.
    #[must_use]
    pub fn assigned_ports(&self) -> Vec<u16> {
        self.buckets
            .iter()
            .flat_map(|b| b.port.iter().map(|p: &PortMapping| p.local))
            .collect()
    }

    /// Names of buckets other than `except` whose image id is `image`.
    #[must_use]
    pub fn buckets_sharing_image(&self, image: &ImageId, except: &str) -> Vec<String> {
        self.buckets
            .iter()
            .filter(|b| b.name != except)
            .filter(|b| b.image.as_ref().is_some_and(|i| &i.image_id == image))
            .map(|b| b.name.clone())
            .collect()
    }
}

fn unknown_bucket(name: &str) -> ResenError {
    ResenError::Config {
        message: format!("bucket \"{name}\" does not exist"),
    }
}
