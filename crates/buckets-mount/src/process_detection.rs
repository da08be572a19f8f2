//! Process table inspection and termination.
//!
//! Backend processes are never tracked across invocations; they are found
//! again by scanning the process table for recognizable command lines.

use std::time::{Duration, Instant};

use crate::error::{MountError, MountResult};

/// Interval between liveness checks while waiting for a process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A running process as seen in the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process ID
    pub pid: u32,
    /// Real uid of the process owner, when readable
    pub uid: Option<u32>,
    /// Full command line, one entry per argument
    pub cmdline: Vec<String>,
}

impl ProcessInfo {
    /// File name of the executable (`argv[0]` without directories).
    pub fn program(&self) -> Option<&str> {
        self.cmdline
            .first()
            .map(|arg0| arg0.rsplit('/').next().unwrap_or(arg0))
    }
}

/// Source of process snapshots and the ability to stop processes.
pub trait ProcessTable: Send + Sync {
    /// All processes visible to the current user.
    fn list(&self) -> MountResult<Vec<ProcessInfo>>;

    /// Stop a process: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// Returns `true` if the process is gone afterwards. A process that no
    /// longer exists counts as terminated.
    fn terminate(&self, pid: u32, grace: Duration) -> bool;
}

/// The running system's process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    /// Handle to the live process table.
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for SystemProcessTable {
    #[cfg(target_os = "linux")]
    fn list(&self) -> MountResult<Vec<ProcessInfo>> {
        let all = procfs::process::all_processes()
            .map_err(|e| MountError::ProcessTable(e.to_string()))?;

        let mut processes = Vec::new();
        for proc in all {
            // Processes can exit mid-scan; skip whatever we can't read.
            let Ok(proc) = proc else { continue };
            let Ok(cmdline) = proc.cmdline() else { continue };
            if cmdline.is_empty() {
                continue;
            }
            let Ok(pid) = u32::try_from(proc.pid()) else {
                continue;
            };
            processes.push(ProcessInfo {
                pid,
                uid: proc.uid().ok(),
                cmdline,
            });
        }
        Ok(processes)
    }

    #[cfg(not(target_os = "linux"))]
    fn list(&self) -> MountResult<Vec<ProcessInfo>> {
        list_with_ps()
    }

    fn terminate(&self, pid: u32, grace: Duration) -> bool {
        terminate_process(pid, grace)
    }
}

/// Fallback listing via `ps` where procfs is unavailable.
///
/// Arguments are split on whitespace, so paths with spaces are not
/// reconstructed exactly.
#[cfg(not(target_os = "linux"))]
fn list_with_ps() -> MountResult<Vec<ProcessInfo>> {
    let output = std::process::Command::new("ps")
        .args(["-axo", "pid=,uid=,command="])
        .output()
        .map_err(|e| MountError::ProcessTable(format!("failed to run ps: {e}")))?;

    if !output.status.success() {
        return Err(MountError::ProcessTable(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().filter_map(parse_ps_line).collect())
}

#[cfg(any(not(target_os = "linux"), test))]
fn parse_ps_line(line: &str) -> Option<ProcessInfo> {
    let mut parts = line.split_whitespace();
    let pid = parts.next()?.parse().ok()?;
    let uid = parts.next()?.parse().ok();
    let cmdline: Vec<String> = parts.map(String::from).collect();
    if cmdline.is_empty() {
        return None;
    }
    Some(ProcessInfo { pid, uid, cmdline })
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw_pid) = i32::try_from(pid) else {
        return false;
    };
    // kill(pid, 0) checks existence without sending a signal
    kill(Pid::from_raw(raw_pid), None).is_ok()
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    // Assume alive on unsupported platforms (safe default)
    true
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
#[cfg(unix)]
pub fn terminate_process(pid: u32, grace: Duration) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw_pid) = i32::try_from(pid) else {
        return false;
    };
    if raw_pid <= 0 || pid == std::process::id() {
        return false;
    }
    let target = Pid::from_raw(raw_pid);

    if kill(target, Signal::SIGTERM).is_err() {
        return !is_process_alive(pid);
    }
    if wait_for_exit(pid, grace) {
        tracing::debug!(pid, "Process exited after SIGTERM");
        return true;
    }

    tracing::warn!(pid, "Process ignored SIGTERM, sending SIGKILL");
    let _ = kill(target, Signal::SIGKILL);
    wait_for_exit(pid, Duration::from_secs(1))
}

#[cfg(not(unix))]
pub fn terminate_process(_pid: u32, _grace: Duration) -> bool {
    false
}

fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(EXIT_POLL_INTERVAL);
    }
}
