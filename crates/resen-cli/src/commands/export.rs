//! `resen export` — Export a bucket to a shareable .tar file.

use std::path::PathBuf;

use clap::Args;
use resen_core::handle::Resen;

use crate::output::format_bytes;

/// Arguments for the `export` command.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Bucket to export.
    pub name: String,

    /// Output file; the extension is always `.tar`.
    pub outfile: PathBuf,

    /// Host directory to leave out of the export; may be repeated.
    #[arg(short, long = "exclude")]
    pub exclude: Vec<PathBuf>,

    /// Image name, defaults to the lower-cased bucket name.
    #[arg(long)]
    pub repo: Option<String>,

    /// Image tag, defaults to `latest`.
    #[arg(long)]
    pub tag: Option<String>,
}

/// Executes the `export` command.
///
/// # Errors
///
/// Returns an error if the bucket has no container or the export fails.
pub fn execute(args: ExportArgs, resen: Resen) -> anyhow::Result<()> {
    let validator = resen.lifecycle().storage_validator();
    let excluded = args
        .exclude
        .iter()
        .map(|path| validator.resolve_local(path))
        .collect::<Result<Vec<_>, _>>()?;
    let usage = resen.lifecycle().disk_usage(resen.store(), &args.name)?;
    let included = usage
        .storage
        .iter()
        .filter(|(path, _)| !excluded.contains(path))
        .fold(0u64, |total, (_, size)| total.saturating_add(*size));
    let container = usage.container.unwrap_or(0);
    let (required, produced) = export_estimate(container, included);
    println!(
        "This export could require up to {} of disk space and produce a file up to {}.",
        format_bytes(required),
        format_bytes(produced)
    );
    println!("Exporting bucket {}. This will take several minutes.", args.name);

    let report = resen.packager().export(
        resen.store(),
        &args.name,
        &args.outfile,
        &args.exclude,
        args.repo.as_deref(),
        args.tag.as_deref(),
    )?;
    println!(
        "Bucket exported to {} ({}).",
        report.outfile.display(),
        format_bytes(report.total_bytes)
    );
    resen.close()?;
    Ok(())
}

/// Worst-case scratch space and output size for an export, in bytes.
fn export_estimate(container: u64, mounts: u64) -> (u64, u64) {
    let produced = container.saturating_add(mounts);
    (container.saturating_mul(3).max(produced.saturating_mul(2)), produced)
}
