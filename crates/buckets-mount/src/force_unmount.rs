//! Unmount commands, graceful and lazy.
//!
//! Callers must establish that the mount point is one of ours before
//! calling anything here; these functions will try to detach any path.
//!
//! # Platform Support
//!
//! - **Linux**: `fusermount3 -u`, `fusermount -u`, `umount`; lazy variants
//!   `fusermount3 -uz`, `fusermount -uz`, `umount -l`
//! - **macOS**: `umount`, `diskutil unmount`; lazy falls back to
//!   `diskutil unmount force` and `umount -f` (no true lazy unmount)

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::daemon::run_with_timeout;
use crate::error::{MountError, MountResult};

/// Upper bound for a single unmount command. Dead FUSE endpoints can make
/// unmount helpers hang.
const UNMOUNT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// How hard to try detaching a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountMode {
    /// Fails if the mount is busy.
    Graceful,
    /// Detaches from the namespace now; busy handles are released later.
    Lazy,
}

#[cfg(target_os = "linux")]
fn strategies(mode: UnmountMode) -> &'static [(&'static str, &'static [&'static str])] {
    match mode {
        UnmountMode::Graceful => &[
            ("fusermount3", &["-u"]),
            ("fusermount", &["-u"]),
            ("umount", &[]),
        ],
        UnmountMode::Lazy => &[
            ("fusermount3", &["-uz"]),
            ("fusermount", &["-uz"]),
            ("umount", &["-l"]),
        ],
    }
}

#[cfg(target_os = "macos")]
fn strategies(mode: UnmountMode) -> &'static [(&'static str, &'static [&'static str])] {
    match mode {
        UnmountMode::Graceful => &[("umount", &[]), ("diskutil", &["unmount"])],
        UnmountMode::Lazy => &[("diskutil", &["unmount", "force"]), ("umount", &["-f"])],
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn strategies(_mode: UnmountMode) -> &'static [(&'static str, &'static [&'static str])] {
    &[("umount", &[])]
}

/// Detach the mount at `mountpoint`, trying each platform helper in turn.
///
/// # Errors
///
/// Returns [`MountError::UnmountFailed`] with the last helper's diagnostic
/// if every helper fails.
pub fn unmount(mountpoint: &Path, mode: UnmountMode) -> MountResult<()> {
    let mut last_error = String::from("no unmount helper available");

    for (program, args) in strategies(mode) {
        let mut cmd = Command::new(program);
        cmd.args(*args).arg(mountpoint);

        match run_with_timeout(cmd, UNMOUNT_COMMAND_TIMEOUT) {
            Ok(output) if output.status.success() => {
                tracing::debug!(
                    "Unmount ({mode:?}) via {program} succeeded for {}",
                    mountpoint.display()
                );
                return Ok(());
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::debug!(
                    "{program} {} failed for {}: {}",
                    args.join(" "),
                    mountpoint.display(),
                    stderr.trim()
                );
                last_error = format!("{program}: {}", stderr.trim());
            }
            Err(e) => {
                tracing::debug!("{program} not usable: {e}");
                last_error = format!("{program}: {e}");
            }
        }
    }

    Err(MountError::UnmountFailed(format!(
        "{}: {last_error}",
        mountpoint.display()
    )))
}

/// Lazy unmount; never blocks on open handles.
pub fn lazy_unmount(mountpoint: &Path) -> MountResult<()> {
    unmount(mountpoint, UnmountMode::Lazy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmount_nonexistent_path_fails() {
        let result = unmount(
            Path::new("/nonexistent/path/that/does/not/exist"),
            UnmountMode::Graceful,
        );
        assert!(matches!(result, Err(MountError::UnmountFailed(_))));
    }

    #[test]
    fn test_lazy_unmount_plain_directory_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        assert!(lazy_unmount(temp.path()).is_err());
    }

    #[test]
    fn test_every_mode_has_a_strategy() {
        assert!(!strategies(UnmountMode::Graceful).is_empty());
        assert!(!strategies(UnmountMode::Lazy).is_empty());
    }
}
