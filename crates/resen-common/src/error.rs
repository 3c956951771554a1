//! Unified error types for the resen workspace.
//!
//! Every library crate returns [`ResenError`]. The variants follow the
//! taxonomy callers branch on: configuration, state, validation, lock, and
//! container runtime failures, plus the ambient I/O and serialization
//! errors.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ResenError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Unknown bucket, duplicate bucket, or unusable configuration.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// The operation is not valid for the bucket's current state.
    #[error("invalid bucket state: {message}")]
    State {
        /// Description of the rejected transition.
        message: String,
    },

    /// An input failed validation before any mutation was applied.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the invalid input.
        message: String,
    },

    /// Another live instance holds the configuration directory lock.
    #[error("another instance of resen is already running (pid {pid}, lock file {path})")]
    Lock {
        /// PID recorded in the lock file.
        pid: u32,
        /// Path of the lock file.
        path: PathBuf,
    },

    /// The container runtime reported an error or an unexpected result.
    #[error("container runtime error: {message}")]
    Runtime {
        /// Description of the runtime failure.
        message: String,
    },

    /// A container runtime call exceeded its timeout.
    #[error("container runtime timed out after {seconds}s during {operation}")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Timeout that was in effect.
        seconds: u64,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// An HTTP request failed.
    #[error("request to {url} failed: {message}")]
    Http {
        /// Requested URL.
        url: String,
        /// Description of the failure.
        message: String,
    },
}

/// Coarse classification of a [`ResenError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown or duplicate bucket, bad configuration.
    Config,
    /// Operation invalid in the current bucket state.
    State,
    /// Rejected input.
    Validation,
    /// Single-instance lock is held.
    Lock,
    /// Collaborator failure, including timeouts.
    Runtime,
    /// Filesystem, serialization, or network failure.
    Io,
}

impl ResenError {
    /// Returns the coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::State { .. } => ErrorKind::State,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Lock { .. } => ErrorKind::Lock,
            Self::Runtime { .. } | Self::Timeout { .. } => ErrorKind::Runtime,
            Self::Io { .. } | Self::Serialization { .. } | Self::Http { .. } => ErrorKind::Io,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::State => write!(f, "state"),
            Self::Validation => write!(f, "validation"),
            Self::Lock => write!(f, "lock"),
            Self::Runtime => write!(f, "runtime"),
            Self::Io => write!(f, "io"),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ResenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_a_runtime_failure() {
        let err = ResenError::Timeout {
            operation: "save".into(),
            seconds: 60,
        };
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert!(err.to_string().contains("60s"));
    }

    #[test]
    fn lock_error_mentions_pid_and_path() {
        let err = ResenError::Lock {
            pid: 4242,
            path: PathBuf::from("/tmp/resen/lock"),
        };
        let msg = err.to_string();
        assert!(msg.contains("4242"));
        assert!(msg.contains("/tmp/resen/lock"));
        assert_eq!(err.kind(), ErrorKind::Lock);
    }

    #[test]
    fn serde_errors_convert_into_io_kind() {
        let source = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: ResenError = source.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
