//! Tar archives for export and import.
//!
//! Extraction is guarded and runs in two passes: every member is checked
//! before anything is written, so one unsafe member rejects the whole
//! archive. Plain `.tar` and gzip-compressed archives are both accepted.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use resen_common::error::{ResenError, Result};
use tar::EntryType;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ResenError + '_ {
    move |e| ResenError::Io {
        path: path.to_path_buf(),
        source: e,
    }
}

fn unsafe_member(archive: &Path, message: String) -> ResenError {
    ResenError::Validation {
        message: format!("unsafe archive {}: {message}", archive.display()),
    }
}

/// Whether the file starts with the gzip magic bytes, falling back to the
/// extension if it cannot be read.
fn is_gzip(path: &Path) -> bool {
    let mut magic = [0u8; 2];
    match File::open(path).and_then(|mut f| f.read_exact(&mut magic)) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(_) => path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz")),
    }
}

fn open(path: &Path) -> Result<tar::Archive<Box<dyn Read>>> {
    let file = File::open(path).map_err(io_error(path))?;
    let reader: Box<dyn Read> = if is_gzip(path) {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(tar::Archive::new(reader))
}

/// Depth of `path` below the root after resolving `..`, or `None` if it is
/// absolute or climbs out of the root.
fn depth_within_root(path: &Path) -> Option<usize> {
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth = depth.checked_sub(1)?,
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(depth)
}

/// Checks one member's path, type, and link target.
fn check_member(member: &Path, kind: EntryType, link: Option<&Path>) -> std::result::Result<(), String> {
    if depth_within_root(member).is_none() {
        return Err(format!("member {} escapes the extraction root", member.display()));
    }
    match kind {
        EntryType::Regular | EntryType::Continuous | EntryType::Directory => Ok(()),
        EntryType::Symlink => {
            let target = link.ok_or_else(|| format!("symlink {} has no target", member.display()))?;
            let resolved = member.parent().unwrap_or_else(|| Path::new("")).join(target);
            if target.is_absolute() || depth_within_root(&resolved).is_none() {
                return Err(format!(
                    "symlink {} points outside the extraction root",
                    member.display()
                ));
            }
            Ok(())
        }
        EntryType::Link => {
            let target = link.ok_or_else(|| format!("hard link {} has no target", member.display()))?;
            if depth_within_root(target).is_none() {
                return Err(format!(
                    "hard link {} points outside the extraction root",
                    member.display()
                ));
            }
            Ok(())
        }
        // pax and GNU extension headers are consumed by the tar reader
        EntryType::XHeader | EntryType::XGlobalHeader | EntryType::GNULongName | EntryType::GNULongLink => {
            Ok(())
        }
        other => Err(format!("member {} has unsupported type {other:?}", member.display())),
    }
}

/// Resolves `path` lexically from the root. Returns every path walked
/// through, one per normal component, and the final path, or `None` if it
/// climbs out of the root.
fn walk(path: &Path) -> Option<(Vec<PathBuf>, PathBuf)> {
    let mut current = PathBuf::new();
    let mut walked = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                current.push(part);
                walked.push(current.clone());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !current.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some((walked, current))
}

/// Rejects members and link targets that are resolved through a symlink
/// declared in the same archive.
fn check_symlink_traversal(members: &[(PathBuf, EntryType, Option<PathBuf>)]) -> std::result::Result<(), String> {
    let symlinks: HashSet<PathBuf> = members
        .iter()
        .filter(|(_, kind, _)| *kind == EntryType::Symlink)
        .filter_map(|(path, _, _)| walk(path).map(|(_, resolved)| resolved))
        .collect();
    if symlinks.is_empty() {
        return Ok(());
    }

    for (path, kind, link) in members {
        let (walked, _) = walk(path).unwrap_or_default();
        if let Some(through) = walked.iter().rev().skip(1).find(|p| symlinks.contains(*p)) {
            return Err(format!(
                "member {} is placed through symlink {}",
                path.display(),
                through.display()
            ));
        }

        let target = match (kind, link) {
            (EntryType::Symlink, Some(target)) => path.parent().unwrap_or_else(|| Path::new("")).join(target),
            (EntryType::Link, Some(target)) => target.clone(),
            _ => continue,
        };
        let Some((walked, resolved)) = walk(&target) else {
            return Err(format!("link {} points outside the extraction root", path.display()));
        };
        // a link may name another symlink, but not walk through one
        let last = walked.len().saturating_sub(1);
        let through = walked
            .iter()
            .enumerate()
            .find(|&(i, p)| symlinks.contains(p) && !(i == last && *p == resolved));
        if let Some((_, through)) = through {
            return Err(format!(
                "link {} is resolved through symlink {}",
                path.display(),
                through.display()
            ));
        }
    }
    Ok(())
}

/// Validates every member of `archive` without writing anything.
///
/// # Errors
///
/// Returns `ResenError::Validation` for the first unsafe member and an I/O
/// error if the archive cannot be read.
pub fn verify(archive: &Path) -> Result<Vec<PathBuf>> {
    let mut reader = open(archive)?;
    let mut members = Vec::new();
    for entry in reader.entries().map_err(io_error(archive))? {
        let entry = entry.map_err(io_error(archive))?;
        let path = entry.path().map_err(io_error(archive))?.into_owned();
        let link = entry
            .link_name()
            .map_err(io_error(archive))?
            .map(std::borrow::Cow::into_owned);
        let kind = entry.header().entry_type();
        check_member(&path, kind, link.as_deref()).map_err(|message| unsafe_member(archive, message))?;
        members.push((path, kind, link));
    }
    check_symlink_traversal(&members).map_err(|message| unsafe_member(archive, message))?;
    Ok(members.into_iter().map(|(path, _, _)| path).collect())
}

/// Extracts `archive` into `target` after every member has passed
/// [`verify`].
///
/// # Errors
///
/// Returns `ResenError::Validation` if any member is unsafe (nothing is
/// written in that case), or an I/O error.
pub fn extract(archive: &Path, target: &Path) -> Result<Vec<PathBuf>> {
    let members = verify(archive)?;
    std::fs::create_dir_all(target).map_err(io_error(target))?;

    let mut reader = open(archive)?;
    reader.set_preserve_permissions(true);
    for entry in reader.entries().map_err(io_error(archive))? {
        let mut entry = entry.map_err(io_error(archive))?;
        let unpacked = entry.unpack_in(target).map_err(io_error(target))?;
        if !unpacked {
            let path = entry.path().map_err(io_error(archive))?.into_owned();
            return Err(unsafe_member(
                archive,
                format!("member {} escapes the extraction root", path.display()),
            ));
        }
    }
    tracing::debug!(
        archive = %archive.display(),
        target = %target.display(),
        members = members.len(),
        "archive extracted"
    );
    Ok(members)
}

/// Writes `dir` as a gzip tar at `dest` with every member under
/// `arcname`. Symlinks are stored as links.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be read or `dest` written.
pub fn pack_dir(dir: &Path, arcname: &str, dest: &Path, level: u32) -> Result<u64> {
    let file = File::create(dest).map_err(io_error(dest))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::new(level)));
    builder.follow_symlinks(false);
    builder.append_dir_all(arcname, dir).map_err(io_error(dir))?;
    let encoder = builder.into_inner().map_err(io_error(dest))?;
    let _ = encoder.finish().map_err(io_error(dest))?;
    let size = std::fs::metadata(dest).map_err(io_error(dest))?.len();
    tracing::debug!(source = %dir.display(), archive = %dest.display(), size, "directory packed");
    Ok(size)
}

/// Bundles `files` into a plain tar at `dest`, each under its file name.
///
/// # Errors
///
/// Returns an I/O error if a file cannot be read or `dest` written.
pub fn bundle(files: &[PathBuf], dest: &Path) -> Result<u64> {
    let file = File::create(dest).map_err(io_error(dest))?;
    let mut builder = tar::Builder::new(file);
    for path in files {
        let name = path.file_name().ok_or_else(|| ResenError::Validation {
            message: format!("cannot bundle {} without a file name", path.display()),
        })?;
        builder.append_path_with_name(path, name).map_err(io_error(path))?;
    }
    builder.finish().map_err(io_error(dest))?;
    Ok(std::fs::metadata(dest).map_err(io_error(dest))?.len())
}
