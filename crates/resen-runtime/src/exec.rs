//! Command execution requests and results for running containers.

use resen_common::constants::DEFAULT_USER;

/// A command to run inside a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Program and arguments.
    pub command: Vec<String>,
    /// User the command runs as.
    pub user: String,
    /// Return immediately without waiting for the command.
    pub detach: bool,
    /// Allocate a pseudo-terminal.
    pub tty: bool,
}

impl ExecRequest {
    /// Creates an attached, non-tty request run as the default user.
    #[must_use]
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            user: DEFAULT_USER.to_string(),
            detach: false,
            tty: false,
        }
    }

    /// Runs a script through a login bash shell.
    #[must_use]
    pub fn bash(script: impl Into<String>) -> Self {
        Self::new(["bash".to_string(), "-cl".to_string(), script.into()])
    }

    /// Sets the user.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets detached mode.
    #[must_use]
    pub const fn detach(mut self, detach: bool) -> Self {
        self.detach = detach;
        self
    }

    /// Sets tty allocation.
    #[must_use]
    pub const fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Command line joined with spaces, for logs and matching.
    #[must_use]
    pub fn display(&self) -> String {
        self.command.join(" ")
    }
}

/// Output from an exec command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code, `None` for a detached command that was started successfully.
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    /// Whether the result matches what the requested mode should produce.
    ///
    /// A detached command reports no exit code; an attached command must
    /// exit with zero.
    #[must_use]
    pub const fn succeeded(&self, detach: bool) -> bool {
        match (detach, self.exit_code) {
            (true, None) | (false, Some(0)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_request_wraps_script() {
        let req = ExecRequest::bash("echo hi").user("root").tty(true);
        assert_eq!(req.command, vec!["bash", "-cl", "echo hi"]);
        assert_eq!(req.user, "root");
        assert!(req.tty);
        assert!(!req.detach);
    }

    #[test]
    fn success_depends_on_mode() {
        let detached = ExecOutput::default();
        assert!(detached.succeeded(true));
        assert!(!detached.succeeded(false));

        let attached = ExecOutput {
            exit_code: Some(0),
            ..ExecOutput::default()
        };
        assert!(attached.succeeded(false));
        assert!(!attached.succeeded(true));

        let failed = ExecOutput {
            exit_code: Some(2),
            ..ExecOutput::default()
        };
        assert!(!failed.succeeded(false));
    }
}
