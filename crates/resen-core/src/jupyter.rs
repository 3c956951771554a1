//! Notebook sessions inside running buckets.
//!
//! A session is a detached `jupyter lab` process. It is found again by
//! scanning the container's process list, so a session launched by an
//! earlier invocation is reused rather than duplicated.

use std::fmt::Write as _;
use std::thread;

use rand::Rng;
use resen_common::constants::DEFAULT_ENVPATH;
use resen_common::error::{ResenError, Result};
use resen_runtime::exec::ExecRequest;

use crate::bucket::Bucket;
use crate::lifecycle::BucketLifecycle;
use crate::store::BucketStore;

const TOKEN_BYTES: usize = 24;
const SESSION_MARKER: &str = "--no-browser --ip 0.0.0.0";

/// A reachable notebook session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JupyterSession {
    /// Local port the notebook is reached on.
    pub port: u16,
    /// Access token.
    pub token: String,
}

impl JupyterSession {
    /// Browser URL including the token.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://localhost:{}/?token={}", self.port, self.token)
    }
}

/// Returns the pid of the notebook server in `ps -ef` output.
#[must_use]
pub fn find_session_pid(ps_output: &str) -> Option<u32> {
    ps_output
        .lines()
        .filter(|line| line.contains("jupyter-lab") || line.contains("jupyter lab"))
        .filter(|line| line.contains(SESSION_MARKER))
        .find_map(|line| line.split_whitespace().nth(1)?.parse().ok())
}

fn generate_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::rng().random();
    bytes.iter().fold(String::with_capacity(TOKEN_BYTES * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn envpath(bucket: &Bucket) -> String {
    bucket
        .image
        .as_ref()
        .and_then(|i| i.envpath.clone())
        .unwrap_or_else(|| DEFAULT_ENVPATH.to_string())
}

fn shutdown_script(port: u16) -> String {
    format!(
        "try:\n    from jupyter_server.serverapp import shutdown_server, list_running_servers\n\
         except ImportError:\n    from notebook.notebookapp import shutdown_server, list_running_servers\n\
         svrs = [x for x in list_running_servers() if x['port'] == {port}]\n\
         sts = True if len(svrs) == 0 else shutdown_server(svrs[0])\n\
         print(sts)\n"
    )
}

impl BucketLifecycle {
    /// Pid of the bucket's notebook server, if one is running.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` unless the bucket is running.
    pub fn jupyter_pid(&self, store: &mut BucketStore, name: &str) -> Result<Option<u32>> {
        let request = ExecRequest::new(["ps", "-ef"]);
        let output = self.execute(store, name, &request)?;
        Ok(find_session_pid(&output.stdout))
    }

    /// Starts a notebook session, or returns the one already running.
    ///
    /// Without explicit ports, the bucket's first port mapping is used.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` unless the bucket is running,
    /// `ResenError::Validation` if no port is given and none is mapped, and
    /// `ResenError::Runtime` if the server never shows up in the process
    /// list.
    pub fn start_jupyter(
        &self,
        store: &mut BucketStore,
        name: &str,
        local: Option<u16>,
        container: Option<u16>,
    ) -> Result<JupyterSession> {
        if self.jupyter_pid(store, name)?.is_some() {
            let bucket = store.get(name)?;
            if let (Some(port), Some(token)) = (bucket.jupyter.port, bucket.jupyter.token.clone()) {
                tracing::info!(bucket = name, port, "jupyter already running");
                return Ok(JupyterSession { port, token });
            }
        }

        let bucket = store.get(name)?;
        let (local, container) = match (local, container) {
            (Some(local), Some(container)) => (local, container),
            (Some(local), None) => (local, local),
            (None, Some(container)) => (container, container),
            (None, None) => {
                let mapping = bucket.port.first().ok_or_else(|| ResenError::Validation {
                    message: format!("bucket \"{name}\" has no port mapping for jupyter"),
                })?;
                (mapping.local, mapping.container)
            }
        };
        let token = generate_token();
        let script = format!(
            "source {}/bin/activate && jupyter lab --no-browser --ip 0.0.0.0 --port {container} \
             --NotebookApp.token={token} --KernelSpecManager.ensure_native_kernel=False",
            envpath(bucket)
        );
        let _ = self.execute(store, name, &ExecRequest::bash(script).detach(true))?;

        let settings = self.settings();
        for attempt in 0..settings.session_poll_attempts {
            if attempt > 0 {
                thread::sleep(settings.session_poll_interval);
            }
            if self.jupyter_pid(store, name)?.is_some() {
                let bucket = store.get_mut(name)?;
                bucket.jupyter.port = Some(local);
                bucket.jupyter.token = Some(token.clone());
                store.save()?;
                tracing::info!(bucket = name, port = local, container_port = container, "jupyter started");
                return Ok(JupyterSession { port: local, token });
            }
        }
        Err(ResenError::Runtime {
            message: format!("failed to start jupyter server in bucket \"{name}\""),
        })
    }

    /// Shuts the notebook session down. Clears stale session fields if no
    /// server is running.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::State` unless the bucket is running, and
    /// `ResenError::Runtime` if the server is still up afterwards.
    pub fn stop_jupyter(&self, store: &mut BucketStore, name: &str) -> Result<()> {
        if self.jupyter_pid(store, name)?.is_none() {
            let bucket = store.get_mut(name)?;
            if bucket.jupyter.port.is_some() || bucket.jupyter.token.is_some() {
                bucket.jupyter.clear();
                store.save()?;
            }
            return Ok(());
        }

        let bucket = store.get(name)?;
        let port = bucket
            .jupyter
            .port
            .map_or(0, |local| {
                bucket
                    .port
                    .iter()
                    .find(|p| p.local == local)
                    .map_or(local, |p| p.container)
            });
        let python = format!("{}/bin/python", envpath(bucket));
        let request = ExecRequest::new([python, "-c".to_string(), shutdown_script(port)]);
        let _ = self.execute(store, name, &request)?;

        let settings = self.settings();
        for attempt in 0..settings.session_poll_attempts {
            if attempt > 0 {
                thread::sleep(settings.session_poll_interval);
            }
            if self.jupyter_pid(store, name)?.is_none() {
                store.get_mut(name)?.jupyter.clear();
                store.save()?;
                tracing::info!(bucket = name, "jupyter stopped");
                return Ok(());
            }
        }
        Err(ResenError::Runtime {
            message: format!("failed to stop jupyter server in bucket \"{name}\""),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PS: &str = "\
UID        PID  PPID  C STIME TTY          TIME CMD
jovyan       1     0  0 10:00 pts/0    00:00:00 bash
jovyan      57     1  2 10:01 ?        00:00:03 /home/jovyan/envs/py36/bin/python /home/jovyan/envs/py36/bin/jupyter-lab --no-browser --ip 0.0.0.0 --port 9000
jovyan      90     1  0 10:02 pts/1    00:00:00 ps -ef
";

    #[test]
    fn finds_notebook_pid() {
        assert_eq!(find_session_pid(PS), Some(57));
    }

    #[test]
    fn ignores_unrelated_processes() {
        assert_eq!(find_session_pid("jovyan 3 1 0 10:00 ? 00:00:00 jupyter lab --port 1\n"), None);
        assert_eq!(find_session_pid(""), None);
    }

    #[test]
    fn tokens_are_hex_and_distinct() {
        let a = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, generate_token());
    }

    #[test]
    fn shutdown_script_targets_port_without_matching_session_marker() {
        let script = shutdown_script(8888);
        assert!(script.contains("x['port'] == 8888"));
        assert!(!script.contains("jupyter lab"));
    }

    #[test]
    fn url_carries_token() {
        let session = JupyterSession {
            port: 9000,
            token: "abc".into(),
        };
        assert_eq!(session.url(), "http://localhost:9000/?token=abc");
    }
}
