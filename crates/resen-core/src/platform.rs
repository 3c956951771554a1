//! Host capabilities that differ between operating systems.
//!
//! Process liveness backs the single-instance lock and mandatory access
//! control detection decides whether mounts need an SELinux relabel. The
//! host implementation is probed once at startup; tests use
//! [`FixedPlatform`].

use std::process::Command;

use resen_common::constants::GETENFORCE_PATH;

/// Platform queries used by the core.
pub trait Platform: Send + Sync {
    /// Whether a process with this id is alive.
    fn process_alive(&self, pid: u32) -> bool;

    /// Whether SELinux is enforcing, so bind mounts need a relabel.
    fn mac_enforcing(&self) -> bool;
}

/// The real host.
#[derive(Debug, Clone, Copy)]
pub struct HostPlatform {
    selinux_enforcing: bool,
}

impl HostPlatform {
    /// Probes the host once.
    #[must_use]
    pub fn detect() -> Self {
        let selinux_enforcing = probe_selinux();
        tracing::debug!(selinux_enforcing, "host platform detected");
        Self { selinux_enforcing }
    }
}

impl Platform for HostPlatform {
    fn process_alive(&self, pid: u32) -> bool {
        pid_alive(pid)
    }

    fn mac_enforcing(&self) -> bool {
        self.selinux_enforcing
    }
}

/// Platform with canned answers.
#[derive(Debug, Clone, Default)]
pub struct FixedPlatform {
    /// Process ids reported alive.
    pub alive: Vec<u32>,
    /// Reported SELinux mode.
    pub enforcing: bool,
}

impl Platform for FixedPlatform {
    fn process_alive(&self, pid: u32) -> bool {
        self.alive.contains(&pid)
    }

    fn mac_enforcing(&self) -> bool {
        self.enforcing
    }
}

fn probe_selinux() -> bool {
    match Command::new(GETENFORCE_PATH).output() {
        Ok(output) if output.status.success() => {
            parse_getenforce(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(_) => false,
        Err(e) => {
            tracing::debug!(error = %e, "getenforce unavailable, assuming SELinux is not enforcing");
            false
        }
    }
}

/// Interprets `getenforce` output.
#[must_use]
pub fn parse_getenforce(output: &str) -> bool {
    output.trim() == "Enforcing"
}

/// Signal-0 probe. `EPERM` means the process exists under another user.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(windows)]
fn pid_alive(pid: u32) -> bool {
    let filter = format!("PID eq {pid}");
    Command::new("tasklist")
        .args(["/FI", &filter, "/NH", "/FO", "CSV"])
        .output()
        .is_ok_and(|output| {
            String::from_utf8_lossy(&output.stdout).contains(&format!("\"{pid}\""))
        })
}

#[cfg(not(any(unix, windows)))]
const fn pid_alive(_pid: u32) -> bool {
    true
}
