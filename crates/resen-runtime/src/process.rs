//! Child process execution with an optional deadline.
//!
//! Runtime calls shell out to the engine's CLI. Each call either streams
//! the child's stdout into a consumer or buffers it, while stderr is
//! collected on a helper thread. When a timeout is set, a watchdog kills
//! the child once the deadline passes and the call fails with
//! `ResenError::Timeout`.

use std::io::Read;
use std::path::PathBuf;
use std::process::{ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use resen_common::error::{ResenError, Result};

const WATCHDOG_INTERVAL: Duration = Duration::from_millis(25);

/// Result of a finished child process.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Exit status of the child.
    pub status: ExitStatus,
    /// Buffered stdout (empty when stdout was streamed).
    pub stdout: String,
    /// Collected stderr.
    pub stderr: String,
}

/// Runs a command to completion and buffers its output.
///
/// # Errors
///
/// Returns an error if the command cannot be spawned, its output cannot be
/// read, or it exceeds `timeout`.
pub fn run(command: &mut Command, operation: &str, timeout: Option<Duration>) -> Result<ProcessOutput> {
    let mut buffer = Vec::new();
    let mut output = run_streaming(command, operation, timeout, |mut stdout| {
        stdout.read_to_end(&mut buffer).map(|_| ())
    })?;
    output.stdout = String::from_utf8_lossy(&buffer).into_owned();
    Ok(output)
}

/// Runs a command, handing its stdout to `consume` as it is produced.
///
/// # Errors
///
/// Returns an error if the command cannot be spawned, `consume` fails, or
/// the command exceeds `timeout`.
pub fn run_streaming<F>(
    command: &mut Command,
    operation: &str,
    timeout: Option<Duration>,
    consume: F,
) -> Result<ProcessOutput>
where
    F: FnOnce(ChildStdout) -> std::io::Result<()>,
{
    let program = PathBuf::from(command.get_program());
    tracing::debug!(program = %program.display(), operation, ?timeout, "spawning runtime command");

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ResenError::Io {
            path: program.clone(),
            source: e,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stderr_reader = thread::spawn(move || {
        let mut text = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut text);
        }
        text
    });

    let child = Arc::new(Mutex::new(child));
    let finished = Arc::new(AtomicBool::new(false));
    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog = timeout.map(|limit| {
        let child = Arc::clone(&child);
        let finished = Arc::clone(&finished);
        let timed_out = Arc::clone(&timed_out);
        let deadline = Instant::now() + limit;
        thread::spawn(move || {
            while !finished.load(Ordering::Acquire) {
                if Instant::now() >= deadline {
                    let mut guard = child.lock().unwrap_or_else(PoisonError::into_inner);
                    if matches!(guard.try_wait(), Ok(None)) {
                        timed_out.store(true, Ordering::Release);
                        let _ = guard.kill();
                    }
                    return;
                }
                thread::sleep(WATCHDOG_INTERVAL);
            }
        })
    });

    let consumed = stdout.map_or(Ok(()), consume);

    let status = loop {
        let polled = child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_wait();
        match polled {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => thread::sleep(WATCHDOG_INTERVAL),
            Err(e) => break Err(e),
        }
    };
    finished.store(true, Ordering::Release);
    if let Some(handle) = watchdog {
        let _ = handle.join();
    }
    let stderr = stderr_reader.join().unwrap_or_default();

    if timed_out.load(Ordering::Acquire) {
        let seconds = timeout.map_or(0, |t| t.as_secs());
        tracing::warn!(operation, seconds, "runtime command timed out");
        return Err(ResenError::Timeout {
            operation: operation.to_string(),
            seconds,
        });
    }

    let status = status.map_err(|e| ResenError::Io {
        path: program.clone(),
        source: e,
    })?;
    consumed.map_err(|e| ResenError::Io {
        path: program,
        source: e,
    })?;

    Ok(ProcessOutput {
        status,
        stdout: String::new(),
        stderr,
    })
}
