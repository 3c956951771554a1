//! CLI command definitions and dispatch.

pub mod create;
pub mod export;
pub mod import;
pub mod list;
pub mod remove;
pub mod start;
pub mod status;
pub mod stop;
pub mod update;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use resen_common::config::ResenConfig;
use resen_common::constants::CONFIG_DIR_ENV;
use resen_core::handle::Resen;

/// resen — reproducible software environments for research.
#[derive(Parser, Debug)]
#[command(name = "resen", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Configuration directory holding buckets, cores, and the lock file.
    #[arg(long, global = true, env = CONFIG_DIR_ENV)]
    pub config_dir: Option<PathBuf>,
}

impl Cli {
    /// Resolves the configuration for this invocation.
    pub fn config(&self) -> ResenConfig {
        self.config_dir
            .as_ref()
            .map_or_else(ResenConfig::default, ResenConfig::with_config_dir)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a bucket and its container.
    Create(create::CreateArgs),
    /// Remove a stopped bucket.
    Remove(remove::RemoveArgs),
    /// List all buckets.
    List(list::ListArgs),
    /// Show one bucket in detail.
    Status(status::StatusArgs),
    /// Start a bucket and its notebook server.
    Start(start::StartArgs),
    /// Stop a bucket's notebook server and the bucket.
    Stop(stop::StopArgs),
    /// Export a bucket to a shareable .tar file.
    Export(export::ExportArgs),
    /// Import a bucket from an exported .tar file.
    Import(import::ImportArgs),
    /// Refresh the list of available resen-core versions.
    Update(update::UpdateArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli, config: ResenConfig) -> anyhow::Result<()> {
    let resen = Resen::open(config)?;
    match cli.command {
        Command::Create(args) => create::execute(args, resen),
        Command::Remove(args) => remove::execute(args, resen),
        Command::List(args) => list::execute(args, resen),
        Command::Status(args) => status::execute(args, resen),
        Command::Start(args) => start::execute(args, resen),
        Command::Stop(args) => stop::execute(args, resen),
        Command::Export(args) => export::execute(args, resen),
        Command::Import(args) => import::execute(args, resen),
        Command::Update(args) => update::execute(args, resen),
    }
}
