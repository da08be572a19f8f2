//! Synthetic mount table, process table and backend.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{MountBackend, ServedMount};
use crate::daemon::DetachedProcess;
use crate::error::{MountError, MountResult};
use crate::force_unmount::UnmountMode;
use crate::layout::{normalize_mount_path, BucketName};
use crate::mount_markers::{MountTable, SystemMount};
use crate::process_detection::{ProcessInfo, ProcessTable};
use crate::rclone::{bucket_from_source, parse_mount_args};

/// Remote name the fake backend mounts from.
pub const FAKE_REMOTE: &str = "remote";

/// Fake pids start here so they never look like the test's own children.
const FAKE_PID_BASE: u32 = 3_000_000;

/// In-memory mount table.
#[derive(Debug, Default)]
pub struct FakeMountTable {
    entries: Mutex<Vec<SystemMount>>,
    fail_reads: Mutex<bool>,
    /// Mount points whose endpoint answers `ENOTCONN`
    disconnected: Mutex<Vec<PathBuf>>,
    /// Entry that appears once the table has been read this many times
    scheduled: Mutex<Option<(usize, SystemMount)>>,
    reads: Mutex<usize>,
}

impl FakeMountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry as the kernel would for an rclone FUSE mount.
    pub fn insert_fuse(&self, fsname: &str, mountpoint: &Path, uid: u32) {
        self.insert(fuse_entry(fsname, normalize_mount_path(mountpoint), uid));
    }

    /// Like [`insert_fuse`](Self::insert_fuse), unless `mountpoint` is
    /// already mounted. Returns whether an entry was added.
    pub fn mount_if_absent(&self, fsname: &str, mountpoint: &Path, uid: u32) -> bool {
        let wanted = normalize_mount_path(mountpoint);
        let mut entries = self.entries.lock();
        if entries.iter().any(|m| m.mountpoint == wanted) {
            return false;
        }
        entries.push(fuse_entry(fsname, wanted, uid));
        true
    }

    pub fn insert(&self, mount: SystemMount) {
        self.entries.lock().push(mount);
    }

    /// Remove the entry at `mountpoint`; returns whether one existed.
    ///
    /// A detached endpoint is reachable again, so its disconnect is cleared.
    pub fn remove(&self, mountpoint: &Path) -> bool {
        let wanted = normalize_mount_path(mountpoint);
        self.disconnected.lock().retain(|p| *p != wanted);
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|m| m.mountpoint != wanted);
        entries.len() != before
    }

    /// Kill the FUSE endpoint at `mountpoint`: its entry stays in the table
    /// but `lstat` fails with `ENOTCONN`, as after the daemon dies.
    pub fn disconnect(&self, mountpoint: &Path) {
        self.disconnected.lock().push(normalize_mount_path(mountpoint));
    }

    /// Add a FUSE entry for `mountpoint` starting with the `nth` read from
    /// now, as a concurrent caller's mount would appear.
    pub fn mount_on_read(&self, nth: usize, fsname: &str, mountpoint: &Path, uid: u32) {
        let due = *self.reads.lock() + nth;
        *self.scheduled.lock() = Some((due, fuse_entry(fsname, normalize_mount_path(mountpoint), uid)));
    }

    /// Make every read fail, as an unreadable `/proc/self/mounts` would.
    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.lock() = fail;
    }
}

impl MountTable for FakeMountTable {
    fn entries(&self) -> MountResult<Vec<SystemMount>> {
        if *self.fail_reads.lock() {
            return Err(MountError::MountTable("injected read failure".to_string()));
        }
        let reads = {
            let mut reads = self.reads.lock();
            *reads += 1;
            *reads
        };
        let mut scheduled = self.scheduled.lock();
        if scheduled.as_ref().is_some_and(|(due, _)| reads >= *due)
            && let Some((_, mount)) = scheduled.take()
        {
            self.entries.lock().push(mount);
        }
        Ok(self.entries.lock().clone())
    }

    fn lstat(&self, path: &Path) -> io::Result<std::fs::Metadata> {
        if self.disconnected.lock().contains(&normalize_mount_path(path)) {
            return Err(io::Error::from_raw_os_error(libc::ENOTCONN));
        }
        std::fs::symlink_metadata(path)
    }
}

fn fuse_entry(fsname: &str, mountpoint: PathBuf, uid: u32) -> SystemMount {
    SystemMount {
        mountpoint,
        fstype: "fuse.rclone".to_string(),
        fsname: fsname.to_string(),
        options: vec![
            "rw".to_string(),
            "nosuid".to_string(),
            "nodev".to_string(),
            format!("user_id={uid}"),
            format!("group_id={uid}"),
        ],
    }
}

/// In-memory process table.
#[derive(Debug)]
pub struct FakeProcessTable {
    processes: Mutex<Vec<ProcessInfo>>,
    unkillable: Mutex<Vec<u32>>,
    next_pid: AtomicU32,
}

impl Default for FakeProcessTable {
    fn default() -> Self {
        Self {
            processes: Mutex::new(Vec::new()),
            unkillable: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(FAKE_PID_BASE),
        }
    }
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an `rclone mount <source> <mountpoint>` process; returns its pid.
    pub fn add_backend(&self, source: &str, mountpoint: &Path) -> u32 {
        self.add(vec![
            "rclone".to_string(),
            "mount".to_string(),
            source.to_string(),
            mountpoint.display().to_string(),
            "--vfs-cache-mode".to_string(),
            "writes".to_string(),
        ])
    }

    /// Add a process with an arbitrary command line; returns its pid.
    pub fn add(&self, cmdline: Vec<String>) -> u32 {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        self.processes.lock().push(ProcessInfo {
            pid,
            uid: Some(super::TEST_UID),
            cmdline,
        });
        pid
    }

    /// Make `terminate` fail for `pid`.
    pub fn set_unkillable(&self, pid: u32) {
        self.unkillable.lock().push(pid);
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.processes.lock().iter().any(|p| p.pid == pid)
    }
}

impl ProcessTable for FakeProcessTable {
    fn list(&self) -> MountResult<Vec<ProcessInfo>> {
        Ok(self.processes.lock().clone())
    }

    fn terminate(&self, pid: u32, _grace: Duration) -> bool {
        if self.unkillable.lock().contains(&pid) {
            return false;
        }
        self.processes.lock().retain(|p| p.pid != pid);
        true
    }
}

/// How [`FakeBackend::spawn`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartBehavior {
    /// Mount appears immediately and a serving process is registered.
    #[default]
    Mount,
    /// The process exits non-zero after logging an error; nothing is mounted.
    ExitWithError,
    /// The process runs but the mount never appears.
    Hang,
}

#[derive(Debug, Default)]
struct FakeBackendState {
    behavior: StartBehavior,
    unavailable: Option<String>,
    unreachable: Option<String>,
    busy: bool,
    unmount_fails: bool,
    spawn_count: usize,
    access_checks: usize,
    unmount_calls: usize,
    last_pid: Option<u32>,
    entries_at_last_spawn: Option<usize>,
}

/// Backend that edits the fake tables instead of mounting anything.
///
/// Spawned processes are real (`true`, `sh`, `sleep`) so readiness polling,
/// exit detection and termination exercise the production code paths.
#[derive(Debug)]
pub struct FakeBackend {
    table: Arc<FakeMountTable>,
    processes: Arc<FakeProcessTable>,
    owner_uid: u32,
    state: Mutex<FakeBackendState>,
}

impl FakeBackend {
    pub fn new(table: Arc<FakeMountTable>, processes: Arc<FakeProcessTable>) -> Self {
        Self {
            table,
            processes,
            owner_uid: super::TEST_UID,
            state: Mutex::new(FakeBackendState::default()),
        }
    }

    pub fn set_behavior(&self, behavior: StartBehavior) {
        self.state.lock().behavior = behavior;
    }

    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.state.lock().unavailable = reason.map(String::from);
    }

    pub fn set_unreachable(&self, diagnostic: Option<&str>) {
        self.state.lock().unreachable = diagnostic.map(String::from);
    }

    /// Graceful unmounts fail as if files were open.
    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    /// Every unmount fails.
    pub fn set_unmount_fails(&self, fails: bool) {
        self.state.lock().unmount_fails = fails;
    }

    pub fn spawn_count(&self) -> usize {
        self.state.lock().spawn_count
    }

    pub fn access_checks(&self) -> usize {
        self.state.lock().access_checks
    }

    pub fn unmount_calls(&self) -> usize {
        self.state.lock().unmount_calls
    }

    /// Real pid of the most recently spawned helper process.
    pub fn last_pid(&self) -> Option<u32> {
        self.state.lock().last_pid
    }

    /// Number of entries in the mount point when the last spawn happened.
    pub fn entries_at_last_spawn(&self) -> Option<usize> {
        self.state.lock().entries_at_last_spawn
    }

    fn source(bucket: &BucketName) -> String {
        format!("{FAKE_REMOTE}:{bucket}")
    }
}

impl MountBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn unavailable_reason(&self) -> Option<String> {
        self.state.lock().unavailable.clone()
    }

    fn check_access(&self, bucket: &BucketName) -> MountResult<()> {
        let mut state = self.state.lock();
        state.access_checks += 1;
        match &state.unreachable {
            Some(diagnostic) => Err(MountError::BucketUnreachable {
                bucket: bucket.to_string(),
                diagnostic: diagnostic.clone(),
            }),
            None => Ok(()),
        }
    }

    fn spawn(
        &self,
        bucket: &BucketName,
        mount_point: &Path,
        log_file: &Path,
    ) -> MountResult<DetachedProcess> {
        let behavior = {
            let mut state = self.state.lock();
            state.spawn_count += 1;
            state.entries_at_last_spawn = std::fs::read_dir(mount_point).ok().map(Iterator::count);
            state.behavior
        };

        let mut cmd = match behavior {
            StartBehavior::Mount => Command::new("true"),
            StartBehavior::ExitWithError => {
                let mut cmd = Command::new("sh");
                cmd.args(["-c", "echo 'ERROR : fake backend failed: bucket not found' >&2; exit 1"]);
                cmd
            }
            StartBehavior::Hang => {
                let mut cmd = Command::new("sleep");
                cmd.arg("30");
                cmd
            }
        };
        let process = DetachedProcess::spawn(&mut cmd, log_file)?;
        self.state.lock().last_pid = Some(process.pid());

        if behavior == StartBehavior::Mount {
            let source = Self::source(bucket);
            // A racing second start finds the path already mounted and serves nothing.
            if self.table.mount_if_absent(&source, mount_point, self.owner_uid) {
                self.processes.add_backend(&source, mount_point);
            }
        }
        Ok(process)
    }

    fn unmount(&self, mount_point: &Path, mode: UnmountMode) -> MountResult<()> {
        let (busy, fails) = {
            let mut state = self.state.lock();
            state.unmount_calls += 1;
            (state.busy, state.unmount_fails)
        };

        if fails {
            return Err(MountError::UnmountFailed(format!(
                "{}: fake unmount refused",
                mount_point.display()
            )));
        }
        if busy && mode == UnmountMode::Graceful {
            return Err(MountError::UnmountFailed(format!(
                "{}: Device or resource busy",
                mount_point.display()
            )));
        }
        if self.table.remove(mount_point) {
            Ok(())
        } else {
            Err(MountError::UnmountFailed(format!(
                "{}: not mounted",
                mount_point.display()
            )))
        }
    }

    fn owns_mount(&self, mount: &SystemMount) -> bool {
        mount.fstype == "fuse.rclone"
    }

    fn bucket_of_source(&self, fsname: &str) -> Option<String> {
        bucket_from_source(fsname)
    }

    fn served_mount(&self, process: &ProcessInfo) -> Option<ServedMount> {
        if process.program()? != "rclone" {
            return None;
        }
        parse_mount_args(&process.cmdline[1..])
    }
}

