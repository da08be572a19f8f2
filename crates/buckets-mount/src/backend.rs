//! Mount backend abstraction and the controller that drives it.
//!
//! # Architecture
//!
//! - [`MountBackend`]: the external process that serves a bucket at a path
//!   (rclone in production, a fake in tests). It knows how to check
//!   reachability, spawn a server, and recognise its own mount table
//!   entries and processes.
//! - [`BackendController`]: start and stop on top of a backend, with the
//!   bounded readiness poll and process cleanup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::daemon::{read_log_tail, DetachedProcess};
use crate::error::{MountError, MountResult};
use crate::force_unmount::{self, UnmountMode};
use crate::layout::{normalize_mount_path, BucketName};
use crate::mount_markers::SystemMount;
use crate::probe::MountProbe;
use crate::process_detection::{ProcessInfo, ProcessTable};

/// The mount a backend process reports serving, from its command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedMount {
    /// Bucket named in the process's source argument
    pub bucket: String,
    /// Mount point argument, when present
    pub mount_point: Option<PathBuf>,
}

/// A mechanism that serves a remote bucket at a local path.
///
/// # Thread Safety
///
/// Backends must be `Send + Sync` so one instance can be shared by the
/// reconciler and the sweep.
pub trait MountBackend: Send + Sync {
    /// Human-readable name, e.g. "rclone".
    fn name(&self) -> &'static str;

    /// Why this backend cannot be used on this node, if it cannot.
    fn unavailable_reason(&self) -> Option<String>;

    /// Check if the backend can be used on this node.
    fn is_available(&self) -> bool {
        self.unavailable_reason().is_none()
    }

    /// Lightweight reachability probe against a bucket.
    fn check_access(&self, bucket: &BucketName) -> MountResult<()>;

    /// Start a server for `bucket` at `mount_point`, logging to `log_file`.
    ///
    /// Returns as soon as the process is spawned; readiness is polled by
    /// the caller.
    fn spawn(
        &self,
        bucket: &BucketName,
        mount_point: &Path,
        log_file: &Path,
    ) -> MountResult<DetachedProcess>;

    /// Detach the mount at `mount_point`.
    fn unmount(&self, mount_point: &Path, mode: UnmountMode) -> MountResult<()> {
        force_unmount::unmount(mount_point, mode)
    }

    /// True if a mount table entry was created by this backend.
    fn owns_mount(&self, mount: &SystemMount) -> bool;

    /// Bucket name encoded in a mount table source descriptor.
    fn bucket_of_source(&self, fsname: &str) -> Option<String>;

    /// What a process serves, if it is one of this backend's servers.
    fn served_mount(&self, process: &ProcessInfo) -> Option<ServedMount>;
}

/// Result of [`BackendController::start_mount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new backend process brought the mount up.
    Started {
        /// PID of the new backend
        pid: u32,
    },
    /// The mount was already active; nothing was spawned.
    AlreadyActive,
}

/// Result of [`BackendController::stop_mount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The mount was active and has been detached.
    Stopped {
        /// Whether the lazy fallback was needed
        lazy: bool,
        /// Serving processes terminated afterwards
        terminated: usize,
    },
    /// The mount was not active.
    AlreadyInactive {
        /// Leftover serving processes terminated
        terminated: usize,
    },
}

/// Starts and stops backend servers with bounded waits.
#[derive(Clone)]
pub struct BackendController {
    backend: Arc<dyn MountBackend>,
    probe: MountProbe,
    processes: Arc<dyn ProcessTable>,
    config: EngineConfig,
}

impl BackendController {
    /// Controller over `backend`, observing state through `probe` and `processes`.
    pub fn new(
        backend: Arc<dyn MountBackend>,
        probe: MountProbe,
        processes: Arc<dyn ProcessTable>,
        config: EngineConfig,
    ) -> Self {
        Self {
            backend,
            probe,
            processes,
            config,
        }
    }

    /// The backend being driven.
    pub fn backend(&self) -> &Arc<dyn MountBackend> {
        &self.backend
    }

    /// Timing configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fail with [`MountError::BackendUnavailable`] if the backend can't run here.
    pub fn preflight(&self) -> MountResult<()> {
        match self.backend.unavailable_reason() {
            Some(reason) => Err(MountError::BackendUnavailable(reason)),
            None => Ok(()),
        }
    }

    /// Bring up a mount of `bucket` at `mount_point`.
    ///
    /// The mount point must exist and be empty. An already-active mount is
    /// a successful no-op. On any failure the spawned backend is gone by
    /// the time this returns.
    pub fn start_mount(
        &self,
        bucket: &BucketName,
        mount_point: &Path,
        log_file: &Path,
    ) -> MountResult<StartOutcome> {
        if self.probe.is_active_mount(mount_point)? {
            return Ok(StartOutcome::AlreadyActive);
        }

        self.preflight()?;
        self.backend.check_access(bucket)?;

        // The reachability probe can take seconds; another caller may have
        // finished mounting meanwhile.
        if self.probe.is_active_mount(mount_point)? {
            tracing::info!(bucket = %bucket, "Mount appeared while probing, reusing");
            return Ok(StartOutcome::AlreadyActive);
        }

        tracing::info!(
            bucket = %bucket,
            mount_point = %mount_point.display(),
            log = %log_file.display(),
            "Starting {} backend",
            self.backend.name()
        );
        let mut process = self.backend.spawn(bucket, mount_point, log_file)?;
        let pid = process.pid();

        let started = Instant::now();
        let deadline = started + self.config.readiness_timeout;
        loop {
            // Activity is checked before exit: a racing second server that
            // exits with "already mounted" still leaves us with a live mount.
            if self.probe.is_active_mount(mount_point)? {
                tracing::info!(
                    bucket = %bucket,
                    pid,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Mount active"
                );
                return Ok(StartOutcome::Started { pid });
            }

            if let Some(state) = process.exit_status() {
                tracing::error!(bucket = %bucket, pid, %state, "Backend exited during startup");
                return Err(MountError::StartupFailed {
                    mount_point: mount_point.to_path_buf(),
                    status: state.to_string(),
                    log_file: log_file.to_path_buf(),
                    log_tail: read_log_tail(log_file, self.config.log_tail_lines),
                });
            }

            if Instant::now() >= deadline {
                tracing::error!(
                    bucket = %bucket,
                    pid,
                    timeout = ?self.config.readiness_timeout,
                    "Mount not active before deadline, terminating backend"
                );
                process.terminate(self.config.terminate_grace);
                return Err(MountError::StartupTimeout {
                    mount_point: mount_point.to_path_buf(),
                    waited: self.config.readiness_timeout,
                    log_file: log_file.to_path_buf(),
                    log_tail: read_log_tail(log_file, self.config.log_tail_lines),
                });
            }

            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Stop whatever is mounted at `mount_point`.
    ///
    /// Graceful unmount first, lazy unmount if that fails (busy handles),
    /// then any process still serving the path is terminated. An inactive
    /// mount point is a successful no-op.
    pub fn stop_mount(&self, mount_point: &Path) -> MountResult<StopOutcome> {
        if !self.probe.is_active_mount(mount_point)? {
            let terminated = self.terminate_serving(mount_point);
            return Ok(StopOutcome::AlreadyInactive { terminated });
        }

        let lazy = match self.backend.unmount(mount_point, UnmountMode::Graceful) {
            Ok(()) => false,
            Err(graceful_err) => {
                tracing::debug!("Graceful unmount failed ({graceful_err}), trying lazy unmount");
                if let Err(lazy_err) = self.backend.unmount(mount_point, UnmountMode::Lazy) {
                    // Someone else may have detached it meanwhile.
                    if !self.probe.is_active_mount(mount_point)? {
                        return Ok(StopOutcome::AlreadyInactive {
                            terminated: self.terminate_serving(mount_point),
                        });
                    }
                    return Err(lazy_err);
                }
                tracing::warn!(
                    mount_point = %mount_point.display(),
                    "Mount was busy, detached lazily"
                );
                true
            }
        };

        let terminated = self.terminate_serving(mount_point);
        Ok(StopOutcome::Stopped { lazy, terminated })
    }

    /// Processes this backend runs for `mount_point`.
    pub fn serving_processes(&self, mount_point: &Path) -> MountResult<Vec<ProcessInfo>> {
        let wanted = normalize_mount_path(mount_point);
        Ok(self
            .processes
            .list()?
            .into_iter()
            .filter(|p| {
                self.backend
                    .served_mount(p)
                    .and_then(|served| served.mount_point)
                    .is_some_and(|mp| mp == wanted || normalize_mount_path(&mp) == wanted)
            })
            .collect())
    }

    /// Best-effort termination of every process serving `mount_point`.
    ///
    /// Returns the number of processes confirmed gone.
    pub fn terminate_serving(&self, mount_point: &Path) -> usize {
        let serving = match self.serving_processes(mount_point) {
            Ok(serving) => serving,
            Err(e) => {
                tracing::warn!("Cannot list backend processes: {e}");
                return 0;
            }
        };

        let mut terminated = 0;
        for process in &serving {
            tracing::debug!(
                pid = process.pid,
                mount_point = %mount_point.display(),
                "Terminating backend process"
            );
            if self.processes.terminate(process.pid, self.config.terminate_grace) {
                terminated += 1;
            } else {
                tracing::warn!(pid = process.pid, "Backend process did not exit");
            }
        }
        terminated
    }
}

impl std::fmt::Debug for BackendController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendController")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
