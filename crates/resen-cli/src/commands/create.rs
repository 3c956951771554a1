//! `resen create` — Create a bucket and its container.

use std::path::PathBuf;

use clap::Args;
use resen_common::config::validate_bucket_name;
use resen_core::handle::Resen;

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Bucket name: starts with a letter, no spaces, at most 20 characters.
    pub name: String,

    /// resen-core version to build the bucket from.
    #[arg(short = 'c', long = "core")]
    pub version: String,

    /// Extra port mapping, `LOCAL:CONTAINER[/udp]` or `CONTAINER`.
    #[arg(short, long = "port", value_parser = parse_port)]
    pub ports: Vec<PortArg>,

    /// Host directory to mount, `LOCAL:CONTAINER[:r|ro|rw]`.
    #[arg(short, long = "storage", value_parser = parse_storage)]
    pub storage: Vec<StorageArg>,

    /// Give the notebook user sudo rights.
    #[arg(long)]
    pub sudo: bool,

    /// Start the bucket and its notebook server once created.
    #[arg(long)]
    pub start: bool,
}

/// A port mapping requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortArg {
    /// Local port, allocated when absent.
    pub local: Option<u16>,
    /// Container port.
    pub container: u16,
    /// TCP unless `/udp` was given.
    pub tcp: bool,
}

/// A storage mount requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageArg {
    /// Host directory.
    pub local: PathBuf,
    /// Path inside the bucket.
    pub container: String,
    /// Permission token.
    pub permission: String,
}

fn parse_port(value: &str) -> Result<PortArg, String> {
    let (ports, tcp) = match value.rsplit_once('/') {
        Some((ports, "udp")) => (ports, false),
        Some((ports, "tcp")) => (ports, true),
        Some((_, proto)) => return Err(format!("unknown protocol \"{proto}\"")),
        None => (value, true),
    };
    let number = |s: &str| s.parse::<u16>().map_err(|e| format!("invalid port \"{s}\": {e}"));
    match ports.split_once(':') {
        Some((local, container)) => Ok(PortArg {
            local: Some(number(local)?),
            container: number(container)?,
            tcp,
        }),
        None => Ok(PortArg {
            local: None,
            container: number(ports)?,
            tcp,
        }),
    }
}

fn parse_storage(value: &str) -> Result<StorageArg, String> {
    let (rest, permission) = match value.rsplit_once(':') {
        Some((rest, perm)) if matches!(perm, "r" | "ro" | "rw") => (rest, perm),
        _ => (value, "r"),
    };
    let (local, container) = rest
        .rsplit_once(':')
        .ok_or_else(|| format!("expected LOCAL:CONTAINER, got \"{value}\""))?;
    if local.is_empty() || container.is_empty() {
        return Err(format!("expected LOCAL:CONTAINER, got \"{value}\""));
    }
    Ok(StorageArg {
        local: PathBuf::from(local),
        container: container.to_string(),
        permission: permission.to_string(),
    })
}

/// Executes the `create` command.
///
/// Configures the bucket with one automatically chosen port plus any extra
/// ports and mounts, then creates its container.
///
/// # Errors
///
/// Returns an error if the name is invalid or taken, or any step fails.
pub fn execute(args: CreateArgs, mut resen: Resen) -> anyhow::Result<()> {
    validate_bucket_name(&args.name)?;
    let name = args.name.as_str();
    let (lifecycle, store) = resen.split();

    lifecycle.create_bucket(store, name)?;
    println!("...adding core...");
    lifecycle.set_image(store, name, &args.version)?;
    println!("...adding ports...");
    let _ = lifecycle.add_port(store, name, None, None, true)?;
    for port in &args.ports {
        let _ = lifecycle.add_port(store, name, port.local, Some(port.container), port.tcp)?;
    }
    println!("...adding mounts...");
    for mount in &args.storage {
        lifecycle.add_storage(store, name, &mount.local, &mount.container, &mount.permission)?;
    }
    lifecycle.create_container(store, name, args.sudo)?;
    println!("Bucket created successfully!");

    if args.start {
        super::start::start_bucket(lifecycle, store, name)?;
    }
    resen.close()?;
    Ok(())
}
