//! `resen list` — List all buckets.

use clap::Args;
use resen_core::handle::Resen;

use crate::output::{optional, truncate};

/// Arguments for the `list` command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Print only bucket names.
    #[arg(long)]
    pub names: bool,
}

/// Executes the `list` command.
///
/// # Errors
///
/// Returns an error if container statuses cannot be refreshed.
pub fn execute(args: ListArgs, mut resen: Resen) -> anyhow::Result<()> {
    let (lifecycle, store) = resen.split();
    lifecycle.refresh_statuses(store)?;

    if args.names {
        println!("Bucket Name");
        for name in store.names() {
            println!("{name}");
        }
    } else if store.is_empty() {
        println!("No buckets found.");
    } else {
        println!("{:<20}{:<25}{:<25}", "Bucket Name", "Version", "Status");
        for bucket in store.iter() {
            let version = bucket.image.as_ref().map(|i| i.version.as_str());
            let status = bucket.status.map(|s| s.as_str());
            println!(
                "{:<20}{:<25}{:<25}",
                truncate(&bucket.name, 18),
                truncate(&optional(version), 23),
                truncate(&optional(status), 23)
            );
        }
    }
    resen.close()?;
    Ok(())
}
