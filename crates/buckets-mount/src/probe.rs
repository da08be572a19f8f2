//! Mount probe: is this path the root of a live mount?
//!
//! The answer combines two observations that need no remembered state:
//! the path's own metadata (`lstat`, which never follows a symlink alias)
//! and the kernel mount table. A FUSE endpoint whose daemon died still
//! appears in the table but fails `lstat` with `ENOTCONN`; that case is
//! reported separately as [`MountState::Disconnected`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{MountError, MountResult};
use crate::mount_markers::{MountTable, SystemMount};

/// What currently exists at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountState {
    /// Nothing exists at the path.
    Missing,
    /// The path is a symlink (never a mount root itself).
    Symlink,
    /// The path exists but is not a mount root.
    Plain,
    /// The path is the root of a mount that answers `lstat`.
    Mounted,
    /// The path is in the mount table but its FUSE endpoint is gone.
    Disconnected,
}

impl MountState {
    /// True for any state backed by a mount table entry.
    pub fn is_active(self) -> bool {
        matches!(self, MountState::Mounted | MountState::Disconnected)
    }

    /// Short label used in listings.
    pub fn label(self) -> &'static str {
        match self {
            MountState::Missing => "missing",
            MountState::Symlink => "symlink",
            MountState::Plain => "idle",
            MountState::Mounted => "active",
            MountState::Disconnected => "stale",
        }
    }
}

/// Answers mount-state questions from the live mount table.
#[derive(Clone)]
pub struct MountProbe {
    table: Arc<dyn MountTable>,
}

impl MountProbe {
    /// Probe backed by the given mount table.
    pub fn new(table: Arc<dyn MountTable>) -> Self {
        Self { table }
    }

    /// The mount table this probe reads.
    pub fn table(&self) -> &Arc<dyn MountTable> {
        &self.table
    }

    /// Classify what exists at `path`.
    ///
    /// Errors other than "not found" and "endpoint not connected" are
    /// propagated rather than guessed at.
    pub fn state(&self, path: &Path) -> MountResult<MountState> {
        match self.table.lstat(path) {
            Ok(meta) if meta.file_type().is_symlink() => Ok(MountState::Symlink),
            Ok(_) => {
                if self.entry(path)?.is_some() {
                    Ok(MountState::Mounted)
                } else {
                    Ok(MountState::Plain)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(MountState::Missing),
            Err(e) if is_disconnected(&e) => {
                if self.entry(path)?.is_some() {
                    Ok(MountState::Disconnected)
                } else {
                    Err(probe_error(path, e))
                }
            }
            Err(e) => Err(probe_error(path, e)),
        }
    }

    /// True if `path` is the root of a mount table entry.
    pub fn is_active_mount(&self, path: &Path) -> MountResult<bool> {
        Ok(self.state(path)?.is_active())
    }

    /// The mount table entry rooted at `path`, if any.
    pub fn entry(&self, path: &Path) -> MountResult<Option<SystemMount>> {
        self.table.find(path)
    }
}

impl std::fmt::Debug for MountProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountProbe").finish_non_exhaustive()
    }
}

/// `ENOTCONN`: "Transport endpoint is not connected" from a dead FUSE daemon.
pub(crate) fn is_disconnected(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOTCONN)
}

fn probe_error(path: &Path, source: io::Error) -> MountError {
    MountError::Probe {
        path: PathBuf::from(path),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMountTable;
    use tempfile::TempDir;

    #[test]
    fn test_missing_path() {
        let table = Arc::new(FakeMountTable::new());
        let probe = MountProbe::new(table);
        let state = probe.state(Path::new("/nonexistent/probe/path")).unwrap();
        assert_eq!(state, MountState::Missing);
        assert!(!state.is_active());
    }

    #[test]
    fn test_plain_directory() {
        let temp = TempDir::new().unwrap();
        let probe = MountProbe::new(Arc::new(FakeMountTable::new()));
        assert_eq!(probe.state(temp.path()).unwrap(), MountState::Plain);
        assert!(!probe.is_active_mount(temp.path()).unwrap());
    }

    #[test]
    fn test_mounted_directory() {
        let temp = TempDir::new().unwrap();
        let table = Arc::new(FakeMountTable::new());
        table.insert_fuse("s3_remote:b", temp.path(), 1000);

        let probe = MountProbe::new(table);
        assert_eq!(probe.state(temp.path()).unwrap(), MountState::Mounted);
        assert!(probe.is_active_mount(temp.path()).unwrap());
    }

    #[test]
    fn test_symlink_to_mount_is_not_a_mount() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("mnt");
        std::fs::create_dir(&target).unwrap();
        let alias = temp.path().join("alias");
        std::os::unix::fs::symlink(&target, &alias).unwrap();

        let table = Arc::new(FakeMountTable::new());
        table.insert_fuse("s3_remote:b", &target, 1000);

        let probe = MountProbe::new(table);
        assert_eq!(probe.state(&alias).unwrap(), MountState::Symlink);
        assert!(probe.is_active_mount(&target).unwrap());
    }

    #[test]
    fn test_dead_endpoint_is_disconnected() {
        let temp = TempDir::new().unwrap();
        let table = Arc::new(FakeMountTable::new());
        table.insert_fuse("s3_remote:b", temp.path(), 1000);
        table.disconnect(temp.path());

        let probe = MountProbe::new(table.clone());
        assert_eq!(probe.state(temp.path()).unwrap(), MountState::Disconnected);
        assert!(probe.is_active_mount(temp.path()).unwrap());

        table.remove(temp.path());
        assert_eq!(probe.state(temp.path()).unwrap(), MountState::Plain);
    }

    #[test]
    fn test_dead_endpoint_without_table_entry_is_an_error() {
        let temp = TempDir::new().unwrap();
        let table = Arc::new(FakeMountTable::new());
        table.disconnect(temp.path());

        let probe = MountProbe::new(table);
        assert!(matches!(
            probe.state(temp.path()),
            Err(MountError::Probe { .. })
        ));
    }

    #[test]
    fn test_table_error_propagates() {
        let temp = TempDir::new().unwrap();
        let table = Arc::new(FakeMountTable::new());
        table.fail_reads(true);

        let probe = MountProbe::new(table);
        assert!(matches!(
            probe.state(temp.path()),
            Err(MountError::MountTable(_))
        ));
    }

    #[test]
    fn test_labels() {
        assert_eq!(MountState::Mounted.label(), "active");
        assert_eq!(MountState::Disconnected.label(), "stale");
        assert_eq!(MountState::Plain.label(), "idle");
    }

    #[test]
    fn test_enotconn_detection() {
        assert!(is_disconnected(&io::Error::from_raw_os_error(libc::ENOTCONN)));
        assert!(!is_disconnected(&io::Error::from_raw_os_error(libc::ENOENT)));
    }
}
