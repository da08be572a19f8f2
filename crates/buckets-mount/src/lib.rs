//! Node-local mount reconciliation for rclone-backed buckets.
//!
//! Many working directories on a shared compute node can reference the same
//! remote bucket through symlink aliases while the bucket is mounted at most
//! once per node scope. This crate decides whether a live mount exists,
//! brings one up only when needed, fans it out to aliases, repairs mounts
//! whose backend died, and tears everything down without disturbing mounts
//! other callers still use.
//!
//! # Architecture
//!
//! - [`MountLayout`] - where mount points, logs and aliases live
//! - [`MountProbe`] - is a path the root of a live mount
//! - [`BackendController`] - start and stop the external backend with
//!   bounded readiness polling
//! - [`SymlinkManager`] - create, retarget and remove aliases
//! - [`Reconciler`] - mount, unmount, list and status
//! - [`ZombieSweep`] - classify and repair orphaned backend mounts
//!
//! # No registry
//!
//! Nothing is persisted. Every question is answered from the kernel mount
//! table, the process table, and the fixed directory layout, so results
//! stay correct across crashes, job preemption and node reuse.
//!
//! ```text
//! <base>/<user>/rclone/<host>/<scope>/<bucket>           mount point
//! <base>/<user>/rclone-logs/<host>/<scope>/<bucket>.log  backend log
//! <root>/<bucket> -> mount point                         alias
//! ```

mod backend;
mod config;
mod daemon;
mod error;
mod force_unmount;
mod host;
mod identity;
mod layout;
mod mount_markers;
mod probe;
mod process_detection;
mod rclone;
mod reconcile;
mod sweep;
mod symlink;

pub use backend::{BackendController, MountBackend, ServedMount, StartOutcome, StopOutcome};
pub use config::{
    EngineConfig, DEFAULT_LOG_TAIL_LINES, DEFAULT_POLL_INTERVAL, DEFAULT_READINESS_TIMEOUT,
    DEFAULT_TERMINATE_GRACE,
};
pub use daemon::{read_log_tail, DetachedProcess, ExitState};
pub use error::{MountError, MountResult};
pub use force_unmount::{lazy_unmount, unmount, UnmountMode};
pub use host::Host;
pub use identity::{NodeIdentity, JOB_ID_VARS, SHARED_SCOPE};
pub use layout::{normalize_mount_path, BucketName, MountLayout, DEFAULT_BASE_DIR};
pub use mount_markers::{is_fuse_fstype, KernelMountTable, MountTable, SystemMount};
pub use probe::{MountProbe, MountState};
pub use process_detection::{
    is_process_alive, terminate_process, ProcessInfo, ProcessTable, SystemProcessTable,
};
pub use rclone::{
    bucket_from_source, find_executable, fuse_unavailable_reason, RcloneBackend, RcloneOptions,
    DEFAULT_REMOTE,
};
pub use reconcile::{
    CandidateOutcome, CandidateResult, MountEntry, MountOutcome, Reconciler, StatusReport,
    UnmountReport, UnmountScope,
};
pub use sweep::{FixAction, MountHealth, SweepEntry, SweepMode, SweepReport, ZombieSweep};
pub use symlink::{AliasOutcome, AliasRemoval, AliasState, SymlinkManager};

/// Testing utilities: fake mount/process tables, a fake backend and a
/// temp-dir node harness.
pub mod testing;
