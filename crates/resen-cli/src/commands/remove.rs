//! `resen remove` — Remove a stopped bucket.

use clap::Args;
use resen_core::handle::Resen;

/// Arguments for the `remove` command.
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Bucket to remove.
    pub name: String,
}

/// Executes the `remove` command.
///
/// # Errors
///
/// Returns an error if the bucket is running or cleanup fails.
pub fn execute(args: RemoveArgs, mut resen: Resen) -> anyhow::Result<()> {
    let (lifecycle, store) = resen.split();
    lifecycle.remove_bucket(store, &args.name)?;
    println!("Bucket {} removed.", args.name);
    resen.close()?;
    Ok(())
}
