//! Detached backend processes.
//!
//! A backend must outlive the command that started it. It runs in its own
//! session (`setsid`) with stdin closed and both output streams appended to
//! its log sink. The returned [`DetachedProcess`] can observe and stop the
//! process while the starter is still running, but dropping it leaves the
//! backend alone.

use std::fs::OpenOptions;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use crate::error::{MountError, MountResult};
use crate::process_detection::{is_process_alive, terminate_process};

/// Handle to a process spawned in its own session.
#[derive(Debug)]
pub struct DetachedProcess {
    pid: u32,
    child: Child,
}

impl DetachedProcess {
    /// Spawn `command` detached, appending stdout and stderr to `log_file`.
    ///
    /// The log file and its parent directory are created if missing.
    pub fn spawn(command: &mut Command, log_file: &Path) -> MountResult<Self> {
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MountError::io(format!("Failed to create log directory {}", parent.display()), e)
            })?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| MountError::io(format!("Failed to open log {}", log_file.display()), e))?;
        let log_err = log
            .try_clone()
            .map_err(|e| MountError::io("Failed to duplicate log handle", e))?;

        command.stdin(Stdio::null());
        command.stdout(Stdio::from(log));
        command.stderr(Stdio::from(log_err));
        detach(command);

        let child = command.spawn().map_err(MountError::Spawn)?;
        tracing::debug!(pid = child.id(), log = %log_file.display(), "Spawned detached process");
        Ok(Self {
            pid: child.id(),
            child,
        })
    }

    /// Process ID.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status if the process has terminated, `None` while it runs.
    ///
    /// If the status cannot be collected, a vanished process is reported as
    /// exited with an unknown status.
    pub fn exit_status(&mut self) -> Option<ExitState> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(ExitState::Exited(status)),
            Ok(None) => None,
            Err(_) => (!is_process_alive(self.pid)).then_some(ExitState::Unknown),
        }
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. Reaps the child.
    pub fn terminate(&mut self, grace: Duration) -> bool {
        if self.exit_status().is_some() {
            return true;
        }
        // An unreaped child still answers kill(0), so poll try_wait instead.
        let pid = self.pid;
        let child = &mut self.child;
        let _ = send_sigterm(pid);
        let deadline = std::time::Instant::now() + grace;
        while std::time::Instant::now() < deadline {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        tracing::warn!(pid, "Backend ignored SIGTERM, killing");
        let _ = child.kill();
        child.wait().is_ok()
    }
}

/// How a spawned process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Reaped with a known status
    Exited(ExitStatus),
    /// Gone, but its status could not be collected
    Unknown,
}

impl std::fmt::Display for ExitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitState::Exited(status) => write!(f, "{status}"),
            ExitState::Unknown => f.write_str("exited"),
        }
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    // setsid() fails for a process group leader, so no process_group(0) here.
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
        });
    }
}

#[cfg(not(unix))]
fn detach(_command: &mut Command) {}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    i32::try_from(pid)
        .ok()
        .is_some_and(|raw| kill(Pid::from_raw(raw), Signal::SIGTERM).is_ok())
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> bool {
    false
}

/// Run a short-lived command, killing it if it outlives `timeout`.
pub(crate) fn run_with_timeout(mut cmd: Command, timeout: Duration) -> std::io::Result<Output> {
    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let pid = child.id();

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => {
            terminate_process(pid, Duration::ZERO);
            Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("timed out after {timeout:?}"),
            ))
        }
    }
}

/// Last `lines` lines of a log file, or a placeholder if unreadable.
pub fn read_log_tail(path: &Path, lines: usize) -> String {
    match std::fs::read(path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            let all: Vec<&str> = text.lines().collect();
            let start = all.len().saturating_sub(lines);
            let tail = all[start..].join("\n");
            if tail.trim().is_empty() {
                "(log is empty)".to_string()
            } else {
                tail
            }
        }
        Err(e) => format!("(log unavailable: {e})"),
    }
}
