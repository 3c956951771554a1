//! In-memory runtime used by tests.
//!
//! Containers, images, and the process table of each container live in a
//! mutex-guarded map. Notebook launches and shutdowns are simulated well
//! enough for the session logic: launching `jupyter lab` adds a process
//! line, `ps -ef` prints the table, and the shutdown snippet clears it.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use flate2::read::GzDecoder;
use resen_common::constants::DEFAULT_RUNTIME_TIMEOUT;
use resen_common::error::{ResenError, Result};
use resen_common::types::{ContainerId, ContainerStatus, ImageId};

use super::{ContainerRuntime, ContainerSpec};
use crate::exec::{ExecOutput, ExecRequest};
use crate::progress::PullProgress;

const SAVE_HEADER: &str = "memory-image";

#[derive(Debug)]
struct MemoryContainer {
    name: String,
    image: String,
    status: ContainerStatus,
    processes: Vec<String>,
    size: u64,
}

#[derive(Debug)]
struct State {
    containers: BTreeMap<String, MemoryContainer>,
    images: BTreeMap<String, Vec<String>>,
    calls: Vec<String>,
    removed_images: Vec<String>,
    timeout: Duration,
    timeouts_seen: Vec<(String, Duration)>,
    failing: Vec<String>,
    ignore_session_launch: bool,
    next_id: u64,
}

/// Runtime double keeping all state in memory.
#[derive(Debug)]
pub struct MemoryRuntime {
    state: Mutex<State>,
}

impl MemoryRuntime {
    /// Creates an empty runtime with the default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                containers: BTreeMap::new(),
                images: BTreeMap::new(),
                calls: Vec::new(),
                removed_images: Vec::new(),
                timeout: DEFAULT_RUNTIME_TIMEOUT,
                timeouts_seen: Vec::new(),
                failing: Vec::new(),
                ignore_session_launch: false,
                next_id: 1,
            }),
        }
    }

    /// Registers an image with optional `repo:tag` references.
    #[must_use]
    pub fn with_image(self, id: &str, tags: &[&str]) -> Self {
        let _ = self.lock().images.insert(
            id.to_string(),
            tags.iter().map(|t| (*t).to_string()).collect(),
        );
        self
    }

    /// Makes every later call of `operation` fail with a runtime error.
    pub fn fail_on(&self, operation: &str) {
        self.lock().failing.push(operation.to_string());
    }

    /// Makes notebook launches start nothing.
    pub fn ignore_session_launch(&self) {
        self.lock().ignore_session_launch = true;
    }

    /// Operations performed so far, as `"<op> <arg>"` strings.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Image ids or references passed to `remove_image`.
    #[must_use]
    pub fn removed_images(&self) -> Vec<String> {
        self.lock().removed_images.clone()
    }

    /// Ids of images currently present.
    #[must_use]
    pub fn images(&self) -> Vec<String> {
        self.lock().images.keys().cloned().collect()
    }

    /// Names of containers currently present.
    #[must_use]
    pub fn container_names(&self) -> Vec<String> {
        self.lock()
            .containers
            .values()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Overrides a container's status, as if changed outside resen.
    pub fn set_status(&self, id: &ContainerId, status: ContainerStatus) {
        if let Some(container) = self.lock().containers.get_mut(id.as_str()) {
            container.status = status;
        }
    }

    /// Timeout in effect the last time `operation` ran.
    #[must_use]
    pub fn timeout_seen(&self, operation: &str) -> Option<Duration> {
        self.lock()
            .timeouts_seen
            .iter()
            .rev()
            .find(|(op, _)| op == operation)
            .map(|(_, t)| *t)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a call and applies failure injection.
    fn begin(&self, operation: &str, arg: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(format!("{operation} {arg}"));
        let timeout = state.timeout;
        state.timeouts_seen.push((operation.to_string(), timeout));
        if state.failing.iter().any(|op| op == operation) {
            return Err(ResenError::Runtime {
                message: format!("injected {operation} failure"),
            });
        }
        Ok(state)
    }
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn container(&mut self, id: &ContainerId) -> Result<&mut MemoryContainer> {
        self.containers
            .get_mut(id.as_str())
            .ok_or_else(|| ResenError::Runtime {
                message: format!("no such container: {id}"),
            })
    }

    /// Resolves an image id or `repo:tag` reference to an image id.
    fn resolve_image(&self, image: &str) -> Option<String> {
        if self.images.contains_key(image) {
            return Some(image.to_string());
        }
        self.images
            .iter()
            .find(|(_, tags)| tags.iter().any(|t| t == image))
            .map(|(id, _)| id.clone())
    }

    fn fresh_id(&mut self, kind: &str) -> String {
        let id = format!("{kind}{:012}", self.next_id);
        self.next_id += 1;
        id
    }
}

impl ContainerRuntime for MemoryRuntime {
    fn create(&self, spec: &ContainerSpec) -> Result<(ContainerId, ContainerStatus)> {
        let mut state = self.begin("create", &spec.name)?;
        if state.containers.values().any(|c| c.name == spec.name) {
            return Err(ResenError::Runtime {
                message: format!("container name {} is already in use", spec.name),
            });
        }
        let id = state.fresh_id("container");
        let _ = state.containers.insert(
            id.clone(),
            MemoryContainer {
                name: spec.name.clone(),
                image: spec.image.image_id.as_str().to_string(),
                status: ContainerStatus::Created,
                processes: Vec::new(),
                size: 4096,
            },
        );
        Ok((ContainerId::new(id), ContainerStatus::Created))
    }

    fn start(&self, id: &ContainerId) -> Result<ContainerStatus> {
        let mut state = self.begin("start", id.as_str())?;
        let container = state.container(id)?;
        container.status = ContainerStatus::Running;
        Ok(container.status)
    }

    fn stop(&self, id: &ContainerId) -> Result<ContainerStatus> {
        let mut state = self.begin("stop", id.as_str())?;
        let container = state.container(id)?;
        if container.status == ContainerStatus::Running {
            container.status = ContainerStatus::Exited;
            container.processes.clear();
        }
        Ok(container.status)
    }

    fn status(&self, id: &ContainerId) -> Result<ContainerStatus> {
        let mut state = self.begin("status", id.as_str())?;
        Ok(state.container(id)?.status)
    }

    fn exec(&self, id: &ContainerId, request: &ExecRequest) -> Result<ExecOutput> {
        let line = request.display();
        let mut state = self.begin("exec", &line)?;
        let ignore_launch = state.ignore_session_launch;
        let container = state.container(id)?;
        if container.status != ContainerStatus::Running {
            return Err(ResenError::Runtime {
                message: format!("container {id} is not running"),
            });
        }

        let mut stdout = String::new();
        if line.contains("jupyter lab") {
            if !ignore_launch {
                container
                    .processes
                    .push(format!("{} 101 1 0 00:00 ? 00:00:01 {line}", request.user));
            }
        } else if line.contains("ps -ef") {
            stdout.push_str("UID PID PPID C STIME TTY TIME CMD\n");
            for process in &container.processes {
                stdout.push_str(process);
                stdout.push('\n');
            }
        } else if line.contains("shutdown_server") {
            container.processes.clear();
            stdout.push_str("True\n");
        }

        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
            exit_code: if request.detach { None } else { Some(0) },
        })
    }

    fn pull(&self, reference: &str, progress: &mut dyn FnMut(&PullProgress)) -> Result<()> {
        let id = {
            let mut state = self.begin("pull", reference)?;
            let id = format!("sha256:{}", state.fresh_id("pulled"));
            let _ = state.images.insert(id.clone(), vec![reference.to_string()]);
            id
        };
        for current in [512, 1024] {
            progress(&PullProgress {
                layer_id: id.clone(),
                current,
                total: 1024,
            });
        }
        Ok(())
    }

    fn tag(&self, image: &str, repo: &str, tag: &str) -> Result<()> {
        let reference = format!("{repo}:{tag}");
        let mut state = self.begin("tag", &format!("{image} {reference}"))?;
        let id = state.resolve_image(image).ok_or_else(|| ResenError::Runtime {
            message: format!("no such image: {image}"),
        })?;
        if let Some(tags) = state.images.get_mut(&id) {
            if !tags.contains(&reference) {
                tags.push(reference);
            }
        }
        Ok(())
    }

    fn has_image(&self, image: &str) -> Result<bool> {
        let state = self.begin("has_image", image)?;
        Ok(state.resolve_image(image).is_some())
    }

    fn commit(&self, id: &ContainerId, repo: &str, tag: &str) -> Result<ImageId> {
        let mut state = self.begin("commit", &format!("{id} {repo}:{tag}"))?;
        let _ = state.container(id)?;
        let image = format!("sha256:{}", state.fresh_id("commit"));
        let _ = state
            .images
            .insert(image.clone(), vec![format!("{repo}:{tag}")]);
        Ok(ImageId::new(image))
    }

    fn save(&self, image: &str, sink: &mut dyn Write) -> Result<u64> {
        let id = {
            let state = self.begin("save", image)?;
            state.resolve_image(image).ok_or_else(|| ResenError::Runtime {
                message: format!("no such image: {image}"),
            })?
        };
        let body = format!("{SAVE_HEADER} {id}\n");
        sink.write_all(body.as_bytes()).map_err(|e| ResenError::Io {
            path: image.into(),
            source: e,
        })?;
        Ok(body.len() as u64)
    }

    fn load(&self, path: &Path) -> Result<ImageId> {
        let mut state = self.begin("load", &path.display().to_string())?;
        let io_err = |e| ResenError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let mut raw = Vec::new();
        let _ = std::fs::File::open(path)
            .and_then(|mut f| f.read_to_end(&mut raw))
            .map_err(io_err)?;
        let mut text = String::new();
        if raw.starts_with(&[0x1f, 0x8b]) {
            let _ = GzDecoder::new(raw.as_slice())
                .read_to_string(&mut text)
                .map_err(io_err)?;
        } else {
            text = String::from_utf8_lossy(&raw).into_owned();
        }

        let id = BufReader::new(text.as_bytes())
            .lines()
            .map_while(std::result::Result::ok)
            .find_map(|line| {
                line.strip_prefix(SAVE_HEADER)
                    .map(|rest| rest.trim().to_string())
            })
            .ok_or_else(|| ResenError::Runtime {
                message: format!("{} is not an image archive", path.display()),
            })?;
        let _ = state.images.entry(id.clone()).or_default();
        Ok(ImageId::new(id))
    }

    fn remove_container(&self, id: &ContainerId) -> Result<()> {
        let mut state = self.begin("remove_container", id.as_str())?;
        if state.containers.remove(id.as_str()).is_none() {
            return Err(ResenError::Runtime {
                message: format!("no such container: {id}"),
            });
        }
        Ok(())
    }

    fn remove_image(&self, image: &str) -> Result<()> {
        let mut state = self.begin("remove_image", image)?;
        state.removed_images.push(image.to_string());
        let id = state.resolve_image(image).ok_or_else(|| ResenError::Runtime {
            message: format!("no such image: {image}"),
        })?;
        let _ = state.images.remove(&id);
        Ok(())
    }

    fn inspect_size(&self, id: &ContainerId) -> Result<u64> {
        let mut state = self.begin("inspect_size", id.as_str())?;
        Ok(state.container(id)?.size)
    }

    fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    fn set_timeout(&self, timeout: Duration) {
        self.lock().timeout = timeout;
    }

    fn is_available(&self) -> bool {
        true
    }
}

impl MemoryRuntime {
    /// Image a container was created from.
    #[must_use]
    pub fn container_image(&self, id: &ContainerId) -> Option<String> {
        self.lock()
            .containers
            .get(id.as_str())
            .map(|c| c.image.clone())
    }
}
