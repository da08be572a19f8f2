//! rclone as the mount backend.
//!
//! A bucket is served by `rclone mount <remote>:<bucket> <mount point>`.
//! rclone is started without `--daemon` so that its exit status can be
//! observed during startup; detaching is done by [`DetachedProcess`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{MountBackend, ServedMount};
use crate::daemon::{run_with_timeout, DetachedProcess};
use crate::error::{MountError, MountResult};
use crate::layout::BucketName;
use crate::mount_markers::{is_fuse_fstype, SystemMount};
use crate::process_detection::ProcessInfo;

/// Default rclone remote name.
pub const DEFAULT_REMOTE: &str = "s3_remote";

/// Filesystem type rclone mounts report on Linux.
const RCLONE_FSTYPE: &str = "fuse.rclone";

/// rclone subcommands that serve a mount.
const MOUNT_SUBCOMMANDS: &[&str] = &["mount", "cmount", "nfsmount"];

/// Options for the rclone backend, the `[rclone]` table of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RcloneOptions {
    /// rclone executable, a bare name is looked up on `PATH`
    pub binary: PathBuf,
    /// Name of the configured remote
    pub remote: String,
    /// rclone config file; `RCLONE_CONFIG` or `~/.config/rclone/rclone.conf` when unset
    pub config_file: Option<PathBuf>,
    /// `--vfs-cache-mode`
    pub vfs_cache_mode: String,
    /// `--s3-chunk-size`
    pub chunk_size: String,
    /// `--s3-upload-cutoff`
    pub upload_cutoff: String,
    /// `--buffer-size`
    pub buffer_size: String,
    /// `--dir-cache-time`
    #[serde(with = "humantime_serde")]
    pub dir_cache_time: Duration,
    /// `--timeout`
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
    /// `--contimeout`
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// `--log-level`
    pub log_level: String,
    /// Bound on each `rclone lsd` reachability call
    #[serde(with = "humantime_serde")]
    pub access_timeout: Duration,
    /// Appended verbatim to `rclone mount`
    pub extra_args: Vec<String>,
}

impl Default for RcloneOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("rclone"),
            remote: DEFAULT_REMOTE.to_string(),
            config_file: None,
            vfs_cache_mode: "writes".to_string(),
            chunk_size: "50M".to_string(),
            upload_cutoff: "50M".to_string(),
            buffer_size: "50M".to_string(),
            dir_cache_time: Duration::from_secs(30),
            io_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            log_level: "INFO".to_string(),
            access_timeout: Duration::from_secs(30),
            extra_args: Vec::new(),
        }
    }
}

impl RcloneOptions {
    /// Sets the remote name.
    #[must_use]
    pub fn remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Sets the rclone executable.
    #[must_use]
    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// The rclone config file in effect.
    pub fn resolved_config_file(&self) -> Option<PathBuf> {
        self.config_file
            .clone()
            .or_else(|| std::env::var_os("RCLONE_CONFIG").map(PathBuf::from))
            .or_else(|| {
                std::env::var_os("HOME")
                    .map(|home| PathBuf::from(home).join(".config/rclone/rclone.conf"))
            })
    }

    /// Executable name as it appears in `argv[0]`.
    fn program_name(&self) -> &str {
        self.binary
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("rclone")
    }
}

/// Serves buckets with `rclone mount`.
#[derive(Debug, Clone, Default)]
pub struct RcloneBackend {
    options: RcloneOptions,
}

impl RcloneBackend {
    /// Backend with the given options.
    pub fn new(options: RcloneOptions) -> Self {
        Self { options }
    }

    /// Options in effect.
    pub fn options(&self) -> &RcloneOptions {
        &self.options
    }

    /// `<remote>:<bucket>`
    pub fn source(&self, bucket: &BucketName) -> String {
        format!("{}:{bucket}", self.options.remote)
    }

    /// Full argument list for `rclone mount`.
    pub fn mount_args(&self, bucket: &BucketName, mount_point: &Path, log_file: &Path) -> Vec<OsString> {
        let o = &self.options;
        let mut args: Vec<OsString> = vec![
            "mount".into(),
            self.source(bucket).into(),
            mount_point.into(),
        ];
        let flags = [
            ("--vfs-cache-mode", o.vfs_cache_mode.clone()),
            ("--s3-chunk-size", o.chunk_size.clone()),
            ("--s3-upload-cutoff", o.upload_cutoff.clone()),
            ("--buffer-size", o.buffer_size.clone()),
            ("--dir-cache-time", rclone_duration(o.dir_cache_time)),
            ("--timeout", rclone_duration(o.io_timeout)),
            ("--contimeout", rclone_duration(o.connect_timeout)),
            ("--log-level", o.log_level.clone()),
        ];
        for (flag, value) in flags {
            args.push(flag.into());
            args.push(value.into());
        }
        args.push("--log-file".into());
        args.push(log_file.into());
        if let Some(config) = &o.config_file {
            args.push("--config".into());
            args.push(config.into());
        }
        args.extend(o.extra_args.iter().map(OsString::from));
        args
    }

    fn lsd(&self, target: &str) -> Result<(), String> {
        let mut cmd = Command::new(&self.options.binary);
        cmd.arg("lsd").arg(target);
        if let Some(config) = &self.options.config_file {
            cmd.arg("--config").arg(config);
        }

        match run_with_timeout(cmd, self.options.access_timeout) {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

impl MountBackend for RcloneBackend {
    fn name(&self) -> &'static str {
        "rclone"
    }

    fn unavailable_reason(&self) -> Option<String> {
        if find_executable(&self.options.binary).is_none() {
            return Some(format!(
                "{} not found in PATH (install rclone: https://rclone.org/install/)",
                self.options.binary.display()
            ));
        }

        match self.options.resolved_config_file() {
            Some(config) if config.is_file() => {}
            Some(config) => {
                return Some(format!(
                    "rclone config not found at {} (run `rclone config` to create remote '{}')",
                    config.display(),
                    self.options.remote
                ));
            }
            None => return Some("rclone config location unknown (HOME is unset)".to_string()),
        }

        fuse_unavailable_reason()
    }

    fn check_access(&self, bucket: &BucketName) -> MountResult<()> {
        let remote = format!("{}:", self.options.remote);
        self.lsd(&remote).map_err(|stderr| MountError::BucketUnreachable {
            bucket: bucket.to_string(),
            diagnostic: format!("cannot connect to remote '{}': {stderr}", self.options.remote),
        })?;

        self.lsd(&self.source(bucket))
            .map_err(|stderr| MountError::BucketUnreachable {
                bucket: bucket.to_string(),
                diagnostic: stderr,
            })
    }

    fn spawn(
        &self,
        bucket: &BucketName,
        mount_point: &Path,
        log_file: &Path,
    ) -> MountResult<DetachedProcess> {
        let mut cmd = Command::new(&self.options.binary);
        cmd.args(self.mount_args(bucket, mount_point, log_file));
        DetachedProcess::spawn(&mut cmd, log_file)
    }

    fn owns_mount(&self, mount: &SystemMount) -> bool {
        mount.fstype == RCLONE_FSTYPE
            || (is_fuse_fstype(&mount.fstype)
                && mount
                    .fsname
                    .strip_prefix(&self.options.remote)
                    .is_some_and(|rest| rest.starts_with(':')))
    }

    fn bucket_of_source(&self, fsname: &str) -> Option<String> {
        bucket_from_source(fsname)
    }

    fn served_mount(&self, process: &ProcessInfo) -> Option<ServedMount> {
        if process.program()? != self.options.program_name() {
            return None;
        }
        parse_mount_args(&process.cmdline[1..])
    }
}

/// Bucket part of an rclone source, `remote:bucket[/prefix]`.
pub fn bucket_from_source(source: &str) -> Option<String> {
    let (_, path) = source.split_once(':')?;
    let bucket = path.trim_start_matches('/').split('/').next()?;
    (!bucket.is_empty()).then(|| bucket.to_string())
}

/// Source and mount point from the arguments following `argv[0]`.
///
/// The source is the first non-flag argument containing `:` after the
/// mount subcommand; the mount point is the argument right after it.
pub(crate) fn parse_mount_args(args: &[String]) -> Option<ServedMount> {
    let sub = args
        .iter()
        .position(|a| MOUNT_SUBCOMMANDS.contains(&a.as_str()))?;
    let rest = &args[sub + 1..];

    let src_idx = rest
        .iter()
        .position(|a| !a.starts_with('-') && a.contains(':'))?;
    let bucket = bucket_from_source(&rest[src_idx])?;
    let mount_point = rest
        .get(src_idx + 1)
        .filter(|a| !a.starts_with('-'))
        .map(PathBuf::from);

    Some(ServedMount {
        bucket,
        mount_point,
    })
}

/// Duration in rclone's flag syntax.
fn rclone_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Resolve an executable the way a shell would.
pub fn find_executable(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 {
        return binary.is_file().then(|| binary.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Why FUSE mounts cannot work on this node, if they cannot.
#[cfg(target_os = "linux")]
pub fn fuse_unavailable_reason() -> Option<String> {
    (!Path::new("/dev/fuse").exists())
        .then(|| "/dev/fuse not found (install fuse3)".to_string())
}

#[cfg(target_os = "macos")]
pub fn fuse_unavailable_reason() -> Option<String> {
    const FRAMEWORKS: &[&str] = &[
        "/Library/Frameworks/fuse_t.framework",
        "/Library/Frameworks/macFUSE.framework",
    ];
    (!FRAMEWORKS.iter().any(|f| Path::new(f).is_dir()))
        .then(|| "FUSE-T not installed (brew install --cask fuse-t)".to_string())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn fuse_unavailable_reason() -> Option<String> {
    Some(format!("unsupported platform: {}", std::env::consts::OS))
}
