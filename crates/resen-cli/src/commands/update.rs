//! `resen update` — Refresh the list of available resen-core versions.

use clap::Args;
use resen_core::handle::Resen;

/// Arguments for the `update` command.
#[derive(Args, Debug)]
pub struct UpdateArgs {}

/// Executes the `update` command.
///
/// # Errors
///
/// Returns an error if the core list cannot be downloaded or written.
pub fn execute(_args: UpdateArgs, mut resen: Resen) -> anyhow::Result<()> {
    let (lifecycle, _) = resen.split();
    let catalog = lifecycle.catalog_mut();
    catalog.update()?;
    println!("Available versions: {}", catalog.versions().join(", "));
    resen.close()?;
    Ok(())
}
