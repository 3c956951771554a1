//! # resen-core
//!
//! Buckets: persisted container environments built from a core image, with
//! port mappings, host storage mounts, and an optional notebook session.
//!
//! This crate provides:
//! - **Store**: the JSON bucket collection and the single-instance lock.
//! - **Lifecycle**: the bucket state machine driven through a
//!   [`ContainerRuntime`](resen_runtime::backend::ContainerRuntime).
//! - **Packaging**: export of a bucket to a portable archive and import
//!   back into a new bucket, with guarded extraction.
//! - **Facade**: [`Resen`](handle::Resen), one handle per configuration
//!   directory.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod archive;
pub mod bucket;
pub mod catalog;
pub mod handle;
pub mod jupyter;
pub mod lifecycle;
pub mod lock;
pub mod packager;
pub mod platform;
pub mod ports;
pub mod storage;
pub mod store;
pub mod usage;
