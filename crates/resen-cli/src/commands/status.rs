//! `resen status` — Show one bucket in detail.

use clap::Args;
use resen_core::handle::Resen;

use crate::output::{format_bytes, optional};

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Bucket to describe.
    pub name: String,

    /// Also measure the disk space used by the container and mounts.
    #[arg(long)]
    pub disk: bool,
}

/// Executes the `status` command.
///
/// # Errors
///
/// Returns an error if the bucket does not exist or cannot be inspected.
pub fn execute(args: StatusArgs, mut resen: Resen) -> anyhow::Result<()> {
    let (lifecycle, store) = resen.split();
    lifecycle.refresh_statuses(store)?;
    let bucket = store.get(&args.name)?;

    println!("{}\n{}\n", bucket.name, "=".repeat(bucket.name.len()));
    println!("Resen-core Version: {}", optional(bucket.image.as_ref().map(|i| i.version.as_str())));
    println!("Status: {}", optional(bucket.status.map(|s| s.as_str())));
    println!("Jupyter Token: {}", optional(bucket.jupyter.token.as_deref()));
    println!("Jupyter Port: {}", optional(bucket.jupyter.port.map(|p| p.to_string()).as_deref()));
    if let (Some(port), Some(token)) = (bucket.jupyter.port, &bucket.jupyter.token) {
        println!("Jupyter lab URL: http://localhost:{port}/?token={token}");
    }
    if let Some(dir) = &bucket.import_dir {
        println!("Imported into: {}", dir.display());
    }

    println!("\nStorage:");
    println!("{:<40}{:<40}{:<40}", "Local", "Bucket", "Permissions");
    for mount in &bucket.storage {
        println!(
            "{:<40}{:<40}{:<40}",
            mount.local.display().to_string(),
            mount.container,
            mount.permission
        );
    }

    println!("\nPorts:");
    println!("{:<15}{:<15}{:<15}", "Local", "Bucket", "Protocol");
    for port in &bucket.port {
        println!("{:<15}{:<15}{:<15}", port.local, port.container, port.protocol());
    }

    if args.disk {
        let usage = lifecycle.disk_usage(store, &args.name)?;
        println!("\nDisk usage:");
        if let Some(container) = usage.container {
            println!("Container: {}", format_bytes(container));
        }
        for (path, size) in &usage.storage {
            println!("{}: {}", path.display(), format_bytes(*size));
        }
        println!("Total: {}", format_bytes(usage.total()));
    }
    resen.close()?;
    Ok(())
}
