//! # resen — reproducible software environments
//!
//! Creates, runs, and shares buckets: persisted containers built from a
//! resen-core image, with mounted host storage and a notebook server.

mod commands;
mod output;

use clap::Parser;
use resen_core::lock::LockManager;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    let lock = LockManager::new(config.lock_file());
    ctrlc::set_handler(move || {
        if let Err(e) = lock.force_release() {
            tracing::warn!(error = %e, "failed to remove lock file");
        }
        std::process::exit(130);
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    commands::execute(cli, config)
}
