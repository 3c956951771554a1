//! `resen import` — Import a bucket from an exported .tar file.

use std::path::PathBuf;

use clap::Args;
use resen_common::config::validate_bucket_name;
use resen_core::handle::Resen;
use resen_core::packager::{ImportOptions, Packager};

/// Arguments for the `import` command.
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Name of the new bucket.
    pub name: String,

    /// Archive produced by `resen export`.
    pub archive: PathBuf,

    /// Directory to unpack into, defaults to `<resen home>/<name>`.
    #[arg(long)]
    pub extract_dir: Option<PathBuf>,

    /// Image name override.
    #[arg(long)]
    pub repo: Option<String>,

    /// Image tag override.
    #[arg(long)]
    pub tag: Option<String>,

    /// Delete the archive after a successful import.
    #[arg(long)]
    pub remove_archive: bool,

    /// Start the bucket and its notebook server once imported.
    #[arg(long)]
    pub start: bool,
}

/// Executes the `import` command.
///
/// Unpacks the archive, assigns one automatically chosen port, and creates
/// the container without sudo set-up.
///
/// # Errors
///
/// Returns an error if the name is invalid or taken, or any step fails.
pub fn execute(args: ImportArgs, mut resen: Resen) -> anyhow::Result<()> {
    validate_bucket_name(&args.name)?;
    let name = args.name.as_str();
    let extract_dir = args
        .extract_dir
        .clone()
        .unwrap_or_else(|| resen.config().home_dir.join(name));
    let options = ImportOptions {
        extract_dir: Some(extract_dir),
        repo: args.repo.clone(),
        tag: args.tag.clone(),
        remove_image_file: true,
    };

    println!("Importing bucket {name}. This may take several minutes.");
    println!("...extracting bucket...");
    let (lifecycle, store) = resen.split();
    Packager::new(lifecycle).import(store, name, &args.archive, &options)?;
    println!("...adding ports...");
    let _ = lifecycle.add_port(store, name, None, None, true)?;
    lifecycle.create_container(store, name, false)?;
    println!("Bucket {name} imported.");

    if args.start {
        super::start::start_bucket(lifecycle, store, name)?;
    }
    if args.remove_archive {
        println!("Deleting {} as requested.", args.archive.display());
        std::fs::remove_file(&args.archive)?;
    }
    resen.close()?;
    Ok(())
}
