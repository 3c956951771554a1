//! Runtime backend driving the `docker` command-line client.

use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use resen_common::error::{ResenError, Result};
use resen_common::types::{ContainerId, ContainerStatus, ImageId};

use super::{ContainerRuntime, ContainerSpec};
use crate::exec::{ExecOutput, ExecRequest};
use crate::process::{self, ProcessOutput};
use crate::progress::{PullProgress, parse_pull_line};

/// Runtime backed by the docker CLI.
#[derive(Debug)]
pub struct DockerCli {
    binary: PathBuf,
    timeout_ms: AtomicU64,
}

impl DockerCli {
    /// Locates `docker` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Runtime` if no executable is found.
    pub fn new(timeout: Duration) -> Result<Self> {
        let binary = which::which("docker").map_err(|e| ResenError::Runtime {
            message: format!("docker executable not found: {e}"),
        })?;
        tracing::debug!(binary = %binary.display(), "using docker CLI");
        Ok(Self::with_binary(binary, timeout))
    }

    /// Uses an explicit client binary.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout_ms: AtomicU64::new(duration_to_millis(timeout)),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        let _ = cmd.args(args);
        cmd
    }

    fn run(&self, operation: &str, args: &[String]) -> Result<ProcessOutput> {
        process::run(&mut self.command(args), operation, Some(self.timeout()))
    }

    /// Runs a docker subcommand and returns its trimmed stdout, failing on a
    /// non-zero exit.
    fn run_checked(&self, operation: &str, args: &[String]) -> Result<String> {
        let output = self.run(operation, args)?;
        if !output.status.success() {
            return Err(ResenError::Runtime {
                message: format!("docker {operation} failed: {}", output.stderr.trim()),
            });
        }
        Ok(output.stdout.trim().to_string())
    }
}

impl ContainerRuntime for DockerCli {
    fn create(&self, spec: &ContainerSpec) -> Result<(ContainerId, ContainerStatus)> {
        let id = ContainerId::new(self.run_checked("create", &create_args(spec))?);
        tracing::info!(container = %id, name = %spec.name, "container created");
        let status = self.status(&id)?;
        Ok((id, status))
    }

    fn start(&self, id: &ContainerId) -> Result<ContainerStatus> {
        let _ = self.run_checked("start", &args(["start", id.as_str()]))?;
        self.status(id)
    }

    fn stop(&self, id: &ContainerId) -> Result<ContainerStatus> {
        let _ = self.run_checked("stop", &args(["stop", id.as_str()]))?;
        self.status(id)
    }

    fn status(&self, id: &ContainerId) -> Result<ContainerStatus> {
        self.run_checked(
            "inspect",
            &args(["container", "inspect", "--format", "{{.State.Status}}", id.as_str()]),
        )?
        .parse()
    }

    fn exec(&self, id: &ContainerId, request: &ExecRequest) -> Result<ExecOutput> {
        let output = self.run("exec", &exec_args(id, request))?;
        if request.detach {
            if !output.status.success() {
                return Err(ResenError::Runtime {
                    message: format!("docker exec failed: {}", output.stderr.trim()),
                });
            }
            return Ok(ExecOutput {
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: None,
            });
        }
        Ok(ExecOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
        })
    }

    fn pull(&self, reference: &str, progress: &mut dyn FnMut(&PullProgress)) -> Result<()> {
        let output = process::run_streaming(
            &mut self.command(["pull", reference]),
            "pull",
            None,
            |stdout| {
                for line in BufReader::new(stdout).lines() {
                    if let Some(event) = parse_pull_line(&line?) {
                        progress(&event);
                    }
                }
                Ok(())
            },
        )?;
        if !output.status.success() {
            return Err(ResenError::Runtime {
                message: format!("failed to pull {reference}: {}", output.stderr.trim()),
            });
        }
        Ok(())
    }

    fn tag(&self, image: &str, repo: &str, tag: &str) -> Result<()> {
        let _ = self.run_checked("tag", &args(["tag", image, &format!("{repo}:{tag}")]))?;
        Ok(())
    }

    fn has_image(&self, image: &str) -> Result<bool> {
        Ok(self
            .run("image inspect", &args(["image", "inspect", image]))?
            .status
            .success())
    }

    fn commit(&self, id: &ContainerId, repo: &str, tag: &str) -> Result<ImageId> {
        let image = self.run_checked(
            "commit",
            &args(["commit", id.as_str(), &format!("{repo}:{tag}")]),
        )?;
        tracing::info!(container = %id, image = %image, "container committed");
        Ok(ImageId::new(image))
    }

    fn save(&self, image: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut written = 0;
        let output = process::run_streaming(
            &mut self.command(["save", image]),
            "save",
            Some(self.timeout()),
            |mut stdout| {
                written = io::copy(&mut stdout, sink)?;
                Ok(())
            },
        )?;
        if !output.status.success() {
            return Err(ResenError::Runtime {
                message: format!("failed to save {image}: {}", output.stderr.trim()),
            });
        }
        Ok(written)
    }

    fn load(&self, path: &Path) -> Result<ImageId> {
        let stdout = self.run_checked(
            "load",
            &["load".to_string(), "-i".to_string(), path.to_string_lossy().into_owned()],
        )?;
        let loaded = parse_loaded_image(&stdout).ok_or_else(|| ResenError::Runtime {
            message: format!("unexpected docker load output: {stdout}"),
        })?;
        match loaded {
            LoadedImage::Id(id) => Ok(ImageId::new(id)),
            LoadedImage::Reference(reference) => {
                let id = self.run_checked(
                    "image inspect",
                    &args(["image", "inspect", "--format", "{{.Id}}", &reference]),
                )?;
                Ok(ImageId::new(id))
            }
        }
    }

    fn remove_container(&self, id: &ContainerId) -> Result<()> {
        let _ = self.run_checked("rm", &args(["rm", id.as_str()]))?;
        tracing::info!(container = %id, "container removed");
        Ok(())
    }

    fn remove_image(&self, image: &str) -> Result<()> {
        let _ = self.run_checked("rmi", &args(["rmi", image]))?;
        tracing::info!(image, "image removed");
        Ok(())
    }

    fn inspect_size(&self, id: &ContainerId) -> Result<u64> {
        let stdout = self.run_checked(
            "inspect",
            &args([
                "container",
                "inspect",
                "--size",
                "--format",
                "{{.SizeRw}} {{.SizeRootFs}}",
                id.as_str(),
            ]),
        )?;
        parse_size_pair(&stdout).ok_or_else(|| ResenError::Runtime {
            message: format!("unexpected container size output: {stdout}"),
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Acquire))
    }

    fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(duration_to_millis(timeout), Ordering::Release);
    }

    fn is_available(&self) -> bool {
        self.run("info", &args(["info"]))
            .is_ok_and(|output| output.status.success())
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Builds the `docker create` argument list for a container spec.
#[must_use]
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut out = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];
    if spec.tty {
        out.push("-t".into());
    }
    for port in &spec.ports {
        out.push("-p".into());
        out.push(format!("{}:{}/{}", port.local, port.container, port.protocol()));
    }
    for mount in &spec.volumes {
        out.push("-v".into());
        out.push(format!(
            "{}:{}:{}",
            mount.local.display(),
            mount.container,
            mount.permission
        ));
    }
    out.push(spec.image.image_id.as_str().to_string());
    out.extend(spec.command.iter().cloned());
    out
}

/// Builds the `docker exec` argument list for a request.
#[must_use]
pub fn exec_args(id: &ContainerId, request: &ExecRequest) -> Vec<String> {
    let mut out = vec!["exec".to_string()];
    if request.detach {
        out.push("-d".into());
    }
    if request.tty {
        out.push("-t".into());
    }
    out.push("-u".into());
    out.push(request.user.clone());
    out.push(id.as_str().to_string());
    out.extend(request.command.iter().cloned());
    out
}

/// What `docker load` reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedImage {
    /// An untagged image identified by id.
    Id(String),
    /// A tagged image identified by reference.
    Reference(String),
}

/// Parses the last `Loaded image...` line of `docker load` output.
#[must_use]
pub fn parse_loaded_image(stdout: &str) -> Option<LoadedImage> {
    stdout.lines().rev().find_map(|line| {
        let line = line.trim();
        if let Some(id) = line.strip_prefix("Loaded image ID:") {
            Some(LoadedImage::Id(id.trim().to_string()))
        } else {
            line.strip_prefix("Loaded image:")
                .map(|reference| LoadedImage::Reference(reference.trim().to_string()))
        }
    })
}

/// Parses `<SizeRw> <SizeRootFs>` into their sum.
///
/// Docker prints `<no value>` for a missing writable-layer size; that counts
/// as zero.
#[must_use]
pub fn parse_size_pair(stdout: &str) -> Option<u64> {
    let mut total = 0u64;
    let mut fields = 0;
    for field in stdout.split_whitespace() {
        fields += 1;
        match field {
            "<no" | "value>" => {}
            n => total = total.checked_add(n.parse().ok()?)?,
        }
    }
    (fields > 0).then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use resen_common::types::{ImageDescriptor, PortMapping, StorageMount};

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "resen_amisr".into(),
            image: ImageDescriptor {
                version: "2021.1.0".into(),
                repo: "resen-core".into(),
                org: "earthcubeingeo".into(),
                image_id: ImageId::new("sha256:core"),
                repodigest: "sha256:digest".into(),
                envpath: None,
            },
            command: vec!["bash".into()],
            tty: true,
            ports: vec![PortMapping {
                local: 9000,
                container: 8888,
                tcp: true,
            }],
            volumes: vec![StorageMount {
                local: PathBuf::from("/data/amisr"),
                container: "/home/jovyan/mount/amisr".into(),
                permission: "ro".into(),
            }],
        }
    }

    #[test]
    fn create_args_publish_ports_and_mounts() {
        assert_eq!(
            create_args(&spec()),
            vec![
                "create",
                "--name",
                "resen_amisr",
                "-t",
                "-p",
                "9000:8888/tcp",
                "-v",
                "/data/amisr:/home/jovyan/mount/amisr:ro",
                "sha256:core",
                "bash",
            ]
        );
    }

    #[test]
    fn exec_args_carry_mode_flags() {
        let id = ContainerId::new("abc");
        let req = ExecRequest::bash("ps -ef").detach(true);
        assert_eq!(
            exec_args(&id, &req),
            vec!["exec", "-d", "-u", "jovyan", "abc", "bash", "-cl", "ps -ef"]
        );
    }

    #[test]
    fn parses_loaded_image_lines() {
        assert_eq!(
            parse_loaded_image("Loaded image ID: sha256:abc\n"),
            Some(LoadedImage::Id("sha256:abc".into()))
        );
        assert_eq!(
            parse_loaded_image("Loaded image: earthcubeingeo/amisr:latest"),
            Some(LoadedImage::Reference("earthcubeingeo/amisr:latest".into()))
        );
        assert_eq!(parse_loaded_image("nothing here"), None);
    }

    #[test]
    fn parses_container_size() {
        assert_eq!(parse_size_pair("1024 2048\n"), Some(3072));
        assert_eq!(parse_size_pair("<no value> 2048"), Some(2048));
        assert_eq!(parse_size_pair(""), None);
        assert_eq!(parse_size_pair("big 1"), None);
    }

    #[test]
    fn timeout_round_trips_through_shared_handle() {
        let cli = DockerCli::with_binary("docker", Duration::from_secs(120));
        cli.set_timeout(Duration::from_secs(86_400));
        assert_eq!(cli.timeout(), Duration::from_secs(86_400));
    }
}
