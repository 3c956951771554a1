//! `resen stop` — Stop a bucket's notebook server and the bucket.

use clap::Args;
use resen_core::handle::Resen;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Bucket to stop.
    pub name: String,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the notebook server or the container does not stop.
pub fn execute(args: StopArgs, mut resen: Resen) -> anyhow::Result<()> {
    let (lifecycle, store) = resen.split();
    lifecycle.refresh_statuses(store)?;
    if store.get(&args.name)?.is_running() {
        lifecycle.stop_jupyter(store, &args.name)?;
    }
    lifecycle.stop(store, &args.name)?;
    println!("Bucket {} stopped.", args.name);
    resen.close()?;
    Ok(())
}
