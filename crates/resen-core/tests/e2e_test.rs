//! End-to-end tests for resen buckets against the in-memory runtime.
//!
//! These tests drive whole workflows through the public API:
//! 1. Configure, create, start and stop a bucket
//! 2. Notebook sessions inside a running bucket
//! 3. Export to an archive and import it back as a new bucket
//! 4. Guarded extraction of hostile archives
//! 5. Cleanup of imported buckets and disk usage reporting

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use resen_common::error::ResenError;
use resen_common::types::{ContainerStatus, ImageDescriptor, ImageId};
use resen_core::archive;
use resen_core::catalog::CoreCatalog;
use resen_core::lifecycle::{BucketLifecycle, LifecycleSettings};
use resen_core::packager::{ImportOptions, Packager};
use resen_core::ports::PortAllocator;
use resen_core::storage::StorageValidator;
use resen_core::store::BucketStore;
use resen_runtime::backend::ContainerRuntime;
use resen_runtime::backend::memory::MemoryRuntime;

const MOUNT_ROOT: &str = "/home/jovyan/mount";

struct Harness {
    dir: tempfile::TempDir,
    store: BucketStore,
    lifecycle: BucketLifecycle,
    runtime: Arc<MemoryRuntime>,
}

fn harness(relabel: bool) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = BucketStore::load(dir.path().join("buckets.json")).expect("load store");
    let runtime = Arc::new(MemoryRuntime::new().with_image("sha256:core", &[]));
    let core = ImageDescriptor {
        version: "2021.1.0".into(),
        repo: "resen-core".into(),
        org: "earthcubeingeo".into(),
        image_id: ImageId::new("sha256:core"),
        repodigest: "sha256:digest".into(),
        envpath: Some("/home/jovyan/envs/py38".into()),
    };
    let settings = LifecycleSettings {
        session_poll_interval: Duration::from_millis(1),
        session_poll_attempts: 3,
        ..LifecycleSettings::default()
    };
    let lifecycle = BucketLifecycle::new(
        runtime.clone(),
        CoreCatalog::from_cores(vec![core]),
        StorageValidator::new(&[MOUNT_ROOT.to_string()], relabel, None),
        PortAllocator::new(23_000),
        settings,
    );
    Harness {
        dir,
        store,
        lifecycle,
        runtime,
    }
}

fn data_dir(root: &Path, name: &str) -> PathBuf {
    let dir = root.join("host").join(name);
    std::fs::create_dir_all(dir.join("nested")).expect("mkdir");
    std::fs::write(dir.join("nested").join("obs.csv"), "t,v\n0,1\n").expect("write");
    dir
}

/// Bucket with one mount, one port, and a created container.
fn configured_bucket(h: &mut Harness, name: &str) -> PathBuf {
    let data = data_dir(h.dir.path(), &format!("{name}-data"));
    h.lifecycle.create_bucket(&mut h.store, name).expect("create");
    h.lifecycle
        .set_image(&mut h.store, name, "2021.1.0")
        .expect("set image");
    let _ = h
        .lifecycle
        .add_port(&mut h.store, name, None, Some(8888), true)
        .expect("add port");
    h.lifecycle
        .add_storage(&mut h.store, name, &data, &format!("{MOUNT_ROOT}/data"), "ro")
        .expect("add storage");
    h.lifecycle
        .create_container(&mut h.store, name, false)
        .expect("create container");
    data
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[test]
fn pipeline_full_lifecycle_persists_every_step() {
    let mut h = harness(false);
    let _ = configured_bucket(&mut h, "alpha");
    h.lifecycle.start(&mut h.store, "alpha").expect("start");

    let reloaded = BucketStore::load(h.store.path()).expect("reload");
    let bucket = reloaded.get("alpha").expect("bucket");
    assert_eq!(bucket.status, Some(ContainerStatus::Running));
    assert_eq!(bucket.port.len(), 1);
    assert_eq!(bucket.port[0].container, 8888);
    assert_eq!(bucket.storage[0].permission, "ro");

    h.lifecycle.stop(&mut h.store, "alpha").expect("stop");
    h.lifecycle.remove_bucket(&mut h.store, "alpha").expect("remove");
    let reloaded = BucketStore::load(h.store.path()).expect("reload");
    assert!(reloaded.is_empty());
    assert!(h.runtime.container_names().is_empty());
}

#[test]
fn pipeline_relabel_applies_to_new_mounts() {
    let mut h = harness(true);
    let _ = configured_bucket(&mut h, "alpha");
    assert_eq!(h.store.get("alpha").expect("bucket").storage[0].permission, "ro,Z");
}

#[test]
fn pipeline_ports_are_unique_across_buckets() {
    let mut h = harness(false);
    let mut seen = Vec::new();
    for name in ["a", "b", "c"] {
        h.lifecycle.create_bucket(&mut h.store, name).expect("create");
        let mapping = h
            .lifecycle
            .add_port(&mut h.store, name, None, None, true)
            .expect("port");
        assert!(!seen.contains(&mapping.local));
        seen.push(mapping.local);
    }
}

// ── Notebook sessions ────────────────────────────────────────────────

#[test]
fn pipeline_jupyter_session_start_reuse_stop() {
    let mut h = harness(false);
    let _ = configured_bucket(&mut h, "alpha");
    h.lifecycle.start(&mut h.store, "alpha").expect("start");

    let session = h
        .lifecycle
        .start_jupyter(&mut h.store, "alpha", None, None)
        .expect("start jupyter");
    let local = h.store.get("alpha").expect("bucket").port[0].local;
    assert_eq!(session.port, local);
    assert_eq!(session.token.len(), 48);
    assert!(session.url().ends_with(&session.token));
    assert!(
        h.runtime
            .calls()
            .iter()
            .any(|c| c.contains("source /home/jovyan/envs/py38/bin/activate") && c.contains("--port 8888"))
    );

    let again = h
        .lifecycle
        .start_jupyter(&mut h.store, "alpha", None, None)
        .expect("reuse");
    assert_eq!(again, session);

    h.lifecycle.stop_jupyter(&mut h.store, "alpha").expect("stop jupyter");
    let bucket = h.store.get("alpha").expect("bucket");
    assert!(bucket.jupyter.token.is_none());
    assert!(bucket.jupyter.port.is_none());
    assert!(h.runtime.calls().iter().any(|c| c.contains("x['port'] == 8888")));
}

#[test]
fn pipeline_jupyter_launch_that_never_appears_fails() {
    let mut h = harness(false);
    let _ = configured_bucket(&mut h, "alpha");
    h.lifecycle.start(&mut h.store, "alpha").expect("start");
    h.runtime.ignore_session_launch();

    let err = h
        .lifecycle
        .start_jupyter(&mut h.store, "alpha", None, None)
        .unwrap_err();
    assert!(matches!(err, ResenError::Runtime { .. }));
    assert!(h.store.get("alpha").expect("bucket").jupyter.token.is_none());
}

#[test]
fn pipeline_jupyter_needs_running_bucket_and_port() {
    let mut h = harness(false);
    let _ = configured_bucket(&mut h, "alpha");
    assert!(matches!(
        h.lifecycle
            .start_jupyter(&mut h.store, "alpha", None, None)
            .unwrap_err(),
        ResenError::State { .. }
    ));

    h.lifecycle.create_bucket(&mut h.store, "bare").expect("create");
    h.lifecycle
        .set_image(&mut h.store, "bare", "2021.1.0")
        .expect("image");
    h.lifecycle
        .create_container(&mut h.store, "bare", false)
        .expect("container");
    h.lifecycle.start(&mut h.store, "bare").expect("start");
    assert!(matches!(
        h.lifecycle
            .start_jupyter(&mut h.store, "bare", None, None)
            .unwrap_err(),
        ResenError::Validation { .. }
    ));
}

#[test]
fn pipeline_stopping_bucket_clears_session() {
    let mut h = harness(false);
    let _ = configured_bucket(&mut h, "alpha");
    h.lifecycle.start(&mut h.store, "alpha").expect("start");
    let _ = h
        .lifecycle
        .start_jupyter(&mut h.store, "alpha", None, None)
        .expect("jupyter");
    h.lifecycle.stop(&mut h.store, "alpha").expect("stop");
    assert!(h.store.get("alpha").expect("bucket").jupyter.token.is_none());
}

// ── Export / import ──────────────────────────────────────────────────

#[test]
fn pipeline_export_then_import_round_trip() {
    let mut h = harness(true);
    let _ = configured_bucket(&mut h, "Alpha");
    let out_dir = h.dir.path().join("exports");
    std::fs::create_dir_all(&out_dir).expect("mkdir");

    let packager = Packager::new(&h.lifecycle);
    let report = packager
        .export(&h.store, "Alpha", &out_dir.join("alpha.tgz"), &[], None, None)
        .expect("export");
    assert_eq!(report.outfile, out_dir.join("alpha.tar"));
    assert!(report.outfile.exists());
    assert_eq!(report.mounts.len(), 1);
    assert!(
        h.runtime
            .calls()
            .contains(&"remove_image earthcubeingeo/alpha:latest".to_string())
    );

    let extract_dir = h.dir.path().join("imported");
    packager
        .import(
            &mut h.store,
            "beta",
            &report.outfile,
            &ImportOptions {
                extract_dir: Some(extract_dir.clone()),
                ..ImportOptions::default()
            },
        )
        .expect("import");

    let original = h.store.get("Alpha").expect("original").clone();
    let imported = h.store.get("beta").expect("imported");
    let image = imported.image.as_ref().expect("image");
    assert_eq!(image.repo, "alpha");
    assert_eq!(image.version, "latest");
    assert_eq!(image.repodigest, "");
    assert!(imported.status.is_none());
    assert!(imported.container.is_none());
    assert!(imported.port.is_empty());
    assert_eq!(imported.import_dir.as_deref(), Some(extract_dir.as_path()));

    let pairs = |b: &resen_core::bucket::Bucket| -> Vec<(String, String)> {
        b.storage
            .iter()
            .map(|m| (m.container.clone(), m.permission.clone()))
            .collect()
    };
    assert_eq!(pairs(imported), pairs(&original));

    let local = &imported.storage[0].local;
    assert!(local.starts_with(&extract_dir));
    let csv = std::fs::read_to_string(local.join("nested").join("obs.csv")).expect("read");
    assert_eq!(csv, "t,v\n0,1\n");
    assert!(!extract_dir.join("Alpha-data_mount.tgz").exists());
    assert!(
        h.runtime
            .calls()
            .iter()
            .any(|c| c.starts_with("tag ") && c.ends_with("earthcubeingeo/alpha:latest"))
    );
}

#[test]
fn pipeline_export_honours_overrides_and_exclusions() {
    let mut h = harness(false);
    let data = configured_bucket(&mut h, "alpha");
    let packager = Packager::new(&h.lifecycle);
    let report = packager
        .export(
            &h.store,
            "alpha",
            &h.dir.path().join("out"),
            &[data],
            Some("custom"),
            Some("v2"),
        )
        .expect("export");
    assert!(report.mounts.is_empty());

    let extract_dir = h.dir.path().join("x");
    packager
        .import(
            &mut h.store,
            "gamma",
            &report.outfile,
            &ImportOptions {
                extract_dir: Some(extract_dir.clone()),
                tag: Some("v3".into()),
                remove_image_file: true,
                ..ImportOptions::default()
            },
        )
        .expect("import");
    let imported = h.store.get("gamma").expect("imported");
    let image = imported.image.as_ref().expect("image");
    assert_eq!(image.repo, "custom");
    assert_eq!(image.version, "v3");
    assert!(imported.storage.is_empty());
    assert!(!extract_dir.join("alpha_image.tgz").exists());
}

#[test]
fn pipeline_export_matches_exclusions_after_normalizing() {
    let mut h = harness(false);
    let data = configured_bucket(&mut h, "alpha");
    let spelled = h
        .dir
        .path()
        .join("elsewhere")
        .join("..")
        .join("alpha-data")
        .join(".");
    assert_ne!(spelled, data);

    let report = Packager::new(&h.lifecycle)
        .export(&h.store, "alpha", &h.dir.path().join("out"), &[spelled], None, None)
        .expect("export");
    assert!(report.mounts.is_empty());
    let members = archive::verify(&report.outfile).expect("verify");
    assert!(!members.iter().any(|m| m.to_string_lossy().ends_with("_mount.tgz")));
}

#[test]
fn pipeline_export_restores_timeout_on_success_and_failure() {
    let mut h = harness(false);
    let _ = configured_bucket(&mut h, "alpha");
    let before = h.runtime.timeout();
    let export_timeout = h.lifecycle.settings().export_timeout;
    let packager = Packager::new(&h.lifecycle);

    let _ = packager
        .export(&h.store, "alpha", &h.dir.path().join("ok.tar"), &[], None, None)
        .expect("export");
    assert_eq!(h.runtime.timeout(), before);
    assert_eq!(h.runtime.timeout_seen("save"), Some(export_timeout));

    h.runtime.fail_on("save");
    let err = packager
        .export(&h.store, "alpha", &h.dir.path().join("bad.tar"), &[], None, None)
        .unwrap_err();
    assert!(matches!(err, ResenError::Runtime { .. }));
    assert_eq!(h.runtime.timeout(), before);
    assert_eq!(
        h.runtime
            .calls()
            .iter()
            .filter(|c| c.as_str() == "remove_image earthcubeingeo/alpha:latest")
            .count(),
        2
    );
}

#[test]
fn pipeline_export_requires_container() {
    let mut h = harness(false);
    h.lifecycle.create_bucket(&mut h.store, "empty").expect("create");
    let err = Packager::new(&h.lifecycle)
        .export(&h.store, "empty", &h.dir.path().join("e.tar"), &[], None, None)
        .unwrap_err();
    assert!(matches!(err, ResenError::State { .. }));
}

#[test]
fn pipeline_import_rejects_taken_name_before_extracting() {
    let mut h = harness(false);
    h.lifecycle.create_bucket(&mut h.store, "taken").expect("create");
    let extract_dir = h.dir.path().join("never");
    let err = Packager::new(&h.lifecycle)
        .import(
            &mut h.store,
            "taken",
            &h.dir.path().join("missing.tar"),
            &ImportOptions {
                extract_dir: Some(extract_dir.clone()),
                ..ImportOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, ResenError::Config { .. }));
    assert!(!extract_dir.exists());
}

// ── Hostile archives ─────────────────────────────────────────────────

fn escaping_archive(path: &Path) {
    let mut out = Vec::new();
    for (name, data) in [("manifest.json", &b"{}"[..]), ("../../escaped.txt", &b"evil"[..])] {
        let mut header = tar::Header::new_gnu();
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(data);
        out.extend(std::iter::repeat_n(0u8, 512 - data.len()));
    }
    out.extend(std::iter::repeat_n(0u8, 1024));
    std::fs::write(path, out).expect("write archive");
}

#[test]
fn pipeline_import_rejects_escaping_member() {
    let mut h = harness(false);
    let nest = h.dir.path().join("a").join("b");
    std::fs::create_dir_all(&nest).expect("mkdir");
    let archive = nest.join("evil.tar");
    escaping_archive(&archive);

    let extract_dir = nest.join("out");
    let err = Packager::new(&h.lifecycle)
        .import(
            &mut h.store,
            "evil",
            &archive,
            &ImportOptions {
                extract_dir: Some(extract_dir.clone()),
                ..ImportOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, ResenError::Validation { .. }));
    assert!(!h.dir.path().join("a").join("escaped.txt").exists());
    assert!(!nest.join("escaped.txt").exists());
    assert!(!extract_dir.join("manifest.json").exists());
    assert!(!h.store.contains("evil"));
}

// ── Cleanup and usage ────────────────────────────────────────────────

#[test]
fn pipeline_removing_imported_bucket_cleans_up() {
    let mut h = harness(false);
    let _ = configured_bucket(&mut h, "alpha");
    let packager = Packager::new(&h.lifecycle);
    let report = packager
        .export(&h.store, "alpha", &h.dir.path().join("a.tar"), &[], None, None)
        .expect("export");
    let extract_dir = h.dir.path().join("imp");
    packager
        .import(
            &mut h.store,
            "beta",
            &report.outfile,
            &ImportOptions {
                extract_dir: Some(extract_dir.clone()),
                ..ImportOptions::default()
            },
        )
        .expect("import");
    let image_id = h
        .store
        .get("beta")
        .expect("bucket")
        .image
        .as_ref()
        .expect("image")
        .image_id
        .clone();

    h.lifecycle.remove_bucket(&mut h.store, "beta").expect("remove");
    assert!(!extract_dir.exists());
    assert!(h.runtime.removed_images().contains(&image_id.as_str().to_string()));
    assert!(h.store.contains("alpha"));
}

#[test]
fn pipeline_disk_usage_counts_container_and_mounts() {
    let mut h = harness(false);
    let _ = configured_bucket(&mut h, "alpha");
    let usage = h.lifecycle.disk_usage(&h.store, "alpha").expect("usage");
    assert_eq!(usage.container, Some(4096));
    assert_eq!(usage.storage.len(), 1);
    assert_eq!(usage.total_storage(), 8);
    assert_eq!(usage.total(), 4104);
}
