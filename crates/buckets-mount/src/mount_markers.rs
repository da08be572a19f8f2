//! Kernel mount table access.
//!
//! Every "is it mounted" question is answered from the live mount table,
//! never from remembered state, so answers stay correct across crashes and
//! restarts of this tool.
//!
//! # Platform Differences
//!
//! - **Linux**: Parse `/proc/self/mounts` (octal escapes decoded)
//! - **macOS**: Parse `mount` command output

use std::io;
use std::path::{Path, PathBuf};

use crate::error::{MountError, MountResult};
use crate::layout::normalize_mount_path;

/// One entry of the kernel mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemMount {
    /// The mount point path (e.g., `/tmp/alice/rclone/node01/shared/data`)
    pub mountpoint: PathBuf,
    /// The filesystem type (e.g., `fuse.rclone`, `macfuse`)
    pub fstype: String,
    /// The source descriptor (e.g., `s3_remote:data`)
    pub fsname: String,
    /// Raw mount options
    pub options: Vec<String>,
}

impl SystemMount {
    /// Uid of the user that owns a FUSE mount, when the table records it.
    ///
    /// Linux FUSE mounts carry a `user_id=<uid>` option.
    pub fn owner_uid(&self) -> Option<u32> {
        self.options
            .iter()
            .find_map(|opt| opt.strip_prefix("user_id="))
            .and_then(|v| v.parse().ok())
    }

    /// User name recorded by macOS as `mounted by <user>`.
    pub fn owner_name(&self) -> Option<&str> {
        self.options
            .iter()
            .find_map(|opt| opt.strip_prefix("mounted by "))
    }
}

/// Source of mount table snapshots.
///
/// The production implementation reads the kernel table; tests inject a
/// synthetic one.
pub trait MountTable: Send + Sync {
    /// Current mount table entries.
    fn entries(&self) -> MountResult<Vec<SystemMount>>;

    /// The entry whose mount point equals `path`, if any.
    fn find(&self, path: &Path) -> MountResult<Option<SystemMount>> {
        let wanted = normalize_mount_path(path);
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .find(|m| m.mountpoint == wanted || normalize_mount_path(&m.mountpoint) == wanted))
    }

    /// `lstat` of a path in the namespace this table describes.
    ///
    /// A FUSE root whose daemon died fails here with `ENOTCONN`.
    fn lstat(&self, path: &Path) -> io::Result<std::fs::Metadata> {
        std::fs::symlink_metadata(path)
    }
}

/// Filesystem types that indicate FUSE mounts on various platforms.
#[cfg(target_os = "macos")]
const FUSE_FSTYPES: &[&str] = &["macfuse", "osxfuse", "fuse", "fuse-t"];

#[cfg(not(target_os = "macos"))]
const FUSE_FSTYPES: &[&str] = &["fuse", "fuseblk"];

/// Check if a filesystem type indicates a FUSE mount.
pub fn is_fuse_fstype(fstype: &str) -> bool {
    let fstype_lower = fstype.to_lowercase();
    FUSE_FSTYPES
        .iter()
        .any(|ft| fstype_lower == *ft || fstype_lower.starts_with(&format!("{ft}.")))
}

/// The running system's mount table.
#[derive(Debug, Clone, Default)]
pub struct KernelMountTable {
    source: Option<PathBuf>,
}

impl KernelMountTable {
    /// Read the table of the current mount namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a mounts file in `/proc/mounts` format from an arbitrary path.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(path.into()),
        }
    }
}

impl MountTable for KernelMountTable {
    fn entries(&self) -> MountResult<Vec<SystemMount>> {
        if let Some(path) = &self.source {
            return read_mounts_file(path);
        }

        #[cfg(target_os = "linux")]
        {
            read_mounts_file(Path::new("/proc/self/mounts"))
        }

        #[cfg(target_os = "macos")]
        {
            get_system_mounts_macos()
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            Err(MountError::MountTable(
                "mount table inspection is not supported on this platform".to_string(),
            ))
        }
    }
}

fn read_mounts_file(path: &Path) -> MountResult<Vec<SystemMount>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| MountError::MountTable(format!("{}: {e}", path.display())))?;
    Ok(contents.lines().filter_map(parse_proc_mount_line).collect())
}

/// Parse one line of `/proc/mounts`.
///
/// Format: `{device} {mountpoint} {fstype} {options} {dump} {pass}`
/// Example: `s3_remote:data /tmp/alice/rclone/n1/shared/data fuse.rclone rw,user_id=1000 0 0`
pub(crate) fn parse_proc_mount_line(line: &str) -> Option<SystemMount> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }

    let options = parts
        .get(3)
        .map(|opts| opts.split(',').map(String::from).collect())
        .unwrap_or_default();

    Some(SystemMount {
        mountpoint: PathBuf::from(unescape_mount_path(parts[1])),
        fstype: parts[2].to_string(),
        fsname: unescape_mount_path(parts[0]),
        options,
    })
}

/// Unescape special characters in mount paths from /proc/mounts.
///
/// /proc/mounts uses octal escapes for special characters:
/// - `\040` = space
/// - `\011` = tab
/// - `\012` = newline
/// - `\134` = backslash
fn unescape_mount_path(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }

        let mut octal = String::with_capacity(3);
        while octal.len() < 3 {
            match chars.peek() {
                Some(&next) if ('0'..='7').contains(&next) => {
                    octal.push(next);
                    chars.next();
                }
                _ => break,
            }
        }

        if octal.len() == 3
            && let Ok(code) = u8::from_str_radix(&octal, 8)
        {
            result.push(char::from(code));
            continue;
        }

        // Not a valid escape, keep the backslash and digits
        result.push('\\');
        result.push_str(&octal);
    }

    result
}

/// Timeout for mount command execution.
/// Dead FUSE endpoints can make the `mount` command block.
#[cfg(target_os = "macos")]
const MOUNT_COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

#[cfg(target_os = "macos")]
fn get_system_mounts_macos() -> MountResult<Vec<SystemMount>> {
    use std::process::{Command, Stdio};
    use std::sync::mpsc;

    let child = Command::new("mount")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| MountError::MountTable(format!("failed to spawn mount: {e}")))?;

    let (tx, rx) = mpsc::channel();
    let child_id = child.id();
    std::thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    match rx.recv_timeout(MOUNT_COMMAND_TIMEOUT) {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(stdout.lines().filter_map(parse_macos_mount_line).collect())
        }
        Ok(Err(e)) => Err(MountError::MountTable(format!("mount command failed: {e}"))),
        Err(_) => {
            #[allow(clippy::cast_possible_wrap)]
            let pid = nix::unistd::Pid::from_raw(child_id as i32);
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);
            Err(MountError::MountTable(format!(
                "mount command timed out after {MOUNT_COMMAND_TIMEOUT:?}"
            )))
        }
    }
}

/// Parse one line of macOS `mount` output.
///
/// Format: `{fsname} on {mountpoint} ({fstype}, {options...})`
#[cfg(any(target_os = "macos", test))]
pub(crate) fn parse_macos_mount_line(line: &str) -> Option<SystemMount> {
    let on_idx = line.find(" on ")?;
    let fsname = line[..on_idx].to_string();

    let rest = &line[on_idx + 4..];
    let paren_idx = rest.rfind(" (")?;
    let mountpoint = PathBuf::from(&rest[..paren_idx]);

    let opts = rest[paren_idx + 2..].trim_end_matches(')');
    let mut parts = opts.split(',').map(str::trim);
    let fstype = parts.next()?.to_string();
    let options = parts.map(String::from).collect();

    Some(SystemMount {
        mountpoint,
        fstype,
        fsname,
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_proc_mount_line() {
        let line = "s3_remote:teamspace-lrm /tmp/alice/rclone/n1/shared/teamspace-lrm fuse.rclone rw,nosuid,nodev,relatime,user_id=1000,group_id=1000 0 0";
        let mount = parse_proc_mount_line(line).unwrap();

        assert_eq!(mount.fsname, "s3_remote:teamspace-lrm");
        assert_eq!(
            mount.mountpoint,
            PathBuf::from("/tmp/alice/rclone/n1/shared/teamspace-lrm")
        );
        assert_eq!(mount.fstype, "fuse.rclone");
        assert_eq!(mount.owner_uid(), Some(1000));
    }

    #[test]
    fn test_parse_proc_mount_line_too_short() {
        assert!(parse_proc_mount_line("garbage").is_none());
        assert!(parse_proc_mount_line("").is_none());
    }

    #[test]
    fn test_unescape_mount_path() {
        assert_eq!(unescape_mount_path("/mnt/my\\040data"), "/mnt/my data");
        assert_eq!(unescape_mount_path("/mnt/a\\040b\\040c"), "/mnt/a b c");
        assert_eq!(unescape_mount_path("/mnt/plain"), "/mnt/plain");
        assert_eq!(unescape_mount_path("/mnt/back\\134slash"), "/mnt/back\\slash");
        assert_eq!(unescape_mount_path("/mnt/bad\\9"), "/mnt/bad\\9");
    }

    #[test]
    fn test_owner_missing() {
        let mount = parse_proc_mount_line("tmpfs /tmp tmpfs rw 0 0").unwrap();
        assert_eq!(mount.owner_uid(), None);
    }

    #[test]
    fn test_is_fuse_fstype() {
        assert!(is_fuse_fstype("fuse"));
        assert!(is_fuse_fstype("fuse.rclone"));
        assert!(is_fuse_fstype("FUSE"));
        assert!(!is_fuse_fstype("ext4"));
        assert!(!is_fuse_fstype("fusectl-ish"));
    }

    #[test]
    fn test_parse_macos_mount_line() {
        let line = "s3_remote:data on /private/tmp/alice/rclone/mac/shared/data (macfuse, nodev, nosuid, synchronous, mounted by alice)";
        let mount = parse_macos_mount_line(line).unwrap();

        assert_eq!(mount.fsname, "s3_remote:data");
        assert_eq!(
            mount.mountpoint,
            PathBuf::from("/private/tmp/alice/rclone/mac/shared/data")
        );
        assert_eq!(mount.fstype, "macfuse");
        assert_eq!(mount.owner_name(), Some("alice"));
    }

    #[test]
    fn test_kernel_table_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "proc /proc proc rw 0 0").unwrap();
        writeln!(
            file,
            "s3_remote:b /tmp/u/rclone/h/shared/b fuse.rclone rw,user_id=42 0 0"
        )
        .unwrap();

        let table = KernelMountTable::from_file(file.path());
        let entries = table.entries().unwrap();
        assert_eq!(entries.len(), 2);

        let found = table.find(Path::new("/tmp/u/rclone/h/shared/b")).unwrap();
        assert_eq!(found.unwrap().owner_uid(), Some(42));
        assert!(table.find(Path::new("/tmp/u/rclone/h/shared/c")).unwrap().is_none());
    }

    #[test]
    fn test_kernel_table_missing_file_is_error() {
        let table = KernelMountTable::from_file("/nonexistent/mounts/file");
        assert!(matches!(table.entries(), Err(MountError::MountTable(_))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_live_table_readable() {
        let entries = KernelMountTable::new().entries().unwrap();
        assert!(entries.iter().any(|m| m.mountpoint == Path::new("/")));
    }
}
