//! `resen start` — Start a bucket and its notebook server.

use clap::Args;
use resen_core::handle::Resen;
use resen_core::lifecycle::BucketLifecycle;
use resen_core::store::BucketStore;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Bucket to start.
    pub name: String,

    /// Start the container only, without a notebook server.
    #[arg(long)]
    pub no_jupyter: bool,
}

/// Starts the bucket (a no-op if it is running) and its notebook server,
/// printing the URL.
///
/// # Errors
///
/// Returns an error if either start fails.
pub fn start_bucket(lifecycle: &BucketLifecycle, store: &mut BucketStore, name: &str) -> anyhow::Result<()> {
    lifecycle.start(store, name)?;
    println!("...starting jupyterlab...");
    let session = lifecycle.start_jupyter(store, name, None, None)?;
    println!("Jupyter lab can be accessed in a browser at: {}", session.url());
    Ok(())
}

/// Executes the `start` command.
///
/// # Errors
///
/// Returns an error if the bucket cannot be started.
pub fn execute(args: StartArgs, mut resen: Resen) -> anyhow::Result<()> {
    let (lifecycle, store) = resen.split();
    if args.no_jupyter {
        lifecycle.start(store, &args.name)?;
        println!("Bucket {} started.", args.name);
    } else {
        start_bucket(lifecycle, store, &args.name)?;
    }
    resen.close()?;
    Ok(())
}
