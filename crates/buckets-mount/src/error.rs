//! Error type for mount reconciliation.
//!
//! Variants map onto the failure taxonomy the CLI reports through exit codes:
//! precondition conflicts, backend availability, startup failures and
//! probe failures. Conditions that are "already in the desired state" are
//! never errors and have no variant here.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reconciling bucket mounts.
#[derive(Error, Debug)]
pub enum MountError {
    /// The bucket identifier is empty or contains path separators.
    #[error("Invalid bucket name '{name}': {reason}")]
    InvalidBucket {
        /// The identifier as supplied by the caller
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// The alias path is itself a mount point (legacy direct-mount layout).
    #[error(
        "{} is already a mount point. Unmount it first (fusermount -u {}) before using it as an alias.",
        .0.display(),
        .0.display()
    )]
    AliasIsMountPoint(PathBuf),

    /// The alias path exists and is not a symlink.
    #[error("{} exists and is not a symlink; refusing to replace it", .0.display())]
    AliasNotSymlink(PathBuf),

    /// The alias was written but does not resolve to the mount point.
    #[error(
        "Alias {} resolves to {} instead of {}",
        alias.display(),
        resolved.display(),
        expected.display()
    )]
    AliasMismatch {
        /// The alias path
        alias: PathBuf,
        /// What the alias canonicalises to
        resolved: PathBuf,
        /// What it should canonicalise to
        expected: PathBuf,
    },

    /// The backend tooling is missing on this node.
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),

    /// The reachability probe against the bucket failed.
    #[error("Cannot access bucket '{bucket}': {diagnostic}")]
    BucketUnreachable {
        /// Bucket that was probed
        bucket: String,
        /// Backend diagnostic output
        diagnostic: String,
    },

    /// The backend process exited before the mount became active.
    #[error(
        "Backend exited before {} became active ({status}). Log {}:\n{log_tail}",
        mount_point.display(),
        log_file.display()
    )]
    StartupFailed {
        /// Mount point that never activated
        mount_point: PathBuf,
        /// Exit status description
        status: String,
        /// Log sink of the failed backend
        log_file: PathBuf,
        /// Last lines of the log sink
        log_tail: String,
    },

    /// The mount did not become active within the readiness timeout.
    #[error(
        "Mount at {} not active after {:?}. Log {}:\n{log_tail}",
        mount_point.display(),
        waited,
        log_file.display()
    )]
    StartupTimeout {
        /// Mount point that never activated
        mount_point: PathBuf,
        /// How long we polled
        waited: std::time::Duration,
        /// Log sink of the failed backend
        log_file: PathBuf,
        /// Last lines of the log sink
        log_tail: String,
    },

    /// Spawning the backend process failed.
    #[error("Failed to start backend: {0}")]
    Spawn(#[source] io::Error),

    /// Mount state of a path could not be determined.
    #[error("Cannot determine mount state of {}: {source}", path.display())]
    Probe {
        /// Path that was probed
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// Reading the kernel mount table failed.
    #[error("Failed to read mount table: {0}")]
    MountTable(String),

    /// Enumerating running processes failed.
    #[error("Failed to list processes: {0}")]
    ProcessTable(String),

    /// Refused a destructive step on a path outside the managed mount root.
    #[error("Refusing to modify {}: outside managed mount root {}", path.display(), root.display())]
    OutsideMountRoot {
        /// Path that was rejected
        path: PathBuf,
        /// The managed root it had to be inside of
        root: PathBuf,
    },

    /// Every unmount strategy failed.
    #[error("Unmount failed: {0}")]
    UnmountFailed(String),

    /// Filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What we were doing
        context: String,
        /// Underlying failure
        #[source]
        source: io::Error,
    },
}

impl MountError {
    /// Wrap an I/O error with a short description of the failed step.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        MountError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for precondition conflicts that are never auto-resolved.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            MountError::AliasIsMountPoint(_) | MountError::AliasNotSymlink(_)
        )
    }
}

/// Result alias used throughout the crate.
pub type MountResult<T> = Result<T, MountError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        assert!(MountError::AliasIsMountPoint(PathBuf::from("/a")).is_conflict());
        assert!(MountError::AliasNotSymlink(PathBuf::from("/a")).is_conflict());
        assert!(!MountError::BackendUnavailable("x".into()).is_conflict());
    }

    #[test]
    fn test_startup_timeout_message_includes_log_tail() {
        let err = MountError::StartupTimeout {
            mount_point: PathBuf::from("/tmp/u/rclone/h/shared/b"),
            waited: std::time::Duration::from_secs(30),
            log_file: PathBuf::from("/tmp/u/rclone-logs/h/shared/b.log"),
            log_tail: "ERROR : bucket not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("not active after 30s"));
        assert!(msg.contains("ERROR : bucket not found"));
    }
}
