//! Alias management.
//!
//! An alias is a symlink `<root>/<bucket>` pointing at the bucket's mount
//! point. Aliases are the only thing this module touches; it never mounts,
//! unmounts or deletes anything that is not a symlink.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::{MountError, MountResult};
use crate::probe::{MountProbe, MountState};

/// What [`SymlinkManager::ensure_alias`] changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "change")]
pub enum AliasOutcome {
    /// No alias existed.
    Created,
    /// An alias pointing elsewhere was replaced.
    Retargeted {
        /// Former target
        previous: PathBuf,
    },
    /// The alias already pointed at the mount point.
    Unchanged,
}

/// What [`SymlinkManager::remove_alias`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasRemoval {
    /// The symlink was removed.
    Removed,
    /// Nothing existed at the path.
    Missing,
    /// Something other than a symlink exists there; left untouched.
    NotASymlink,
}

/// What currently exists at an alias path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AliasState {
    Missing,
    Symlink {
        /// Raw link target
        target: PathBuf,
        /// Whether it resolves to the expected mount point
        resolves_to_mount: bool,
    },
    NotASymlink,
}

/// Creates, retargets and removes aliases.
#[derive(Debug, Clone)]
pub struct SymlinkManager {
    probe: MountProbe,
}

impl SymlinkManager {
    pub fn new(probe: MountProbe) -> Self {
        Self { probe }
    }

    /// Refuse alias paths that are mount points or real files/directories.
    pub fn check_alias(&self, alias: &Path) -> MountResult<()> {
        match self.probe.state(alias)? {
            MountState::Mounted | MountState::Disconnected => {
                Err(MountError::AliasIsMountPoint(alias.to_path_buf()))
            }
            MountState::Plain => Err(MountError::AliasNotSymlink(alias.to_path_buf())),
            MountState::Missing | MountState::Symlink => Ok(()),
        }
    }

    /// Point `alias` at `target`, replacing any existing symlink atomically.
    ///
    /// Fails without changes if `alias` is a mount point or not a symlink.
    /// After writing, both paths must canonicalize to the same location;
    /// otherwise the previous alias (or its absence) is restored.
    pub fn ensure_alias(&self, alias: &Path, target: &Path) -> MountResult<AliasOutcome> {
        self.check_alias(alias)?;

        let outcome = match std::fs::read_link(alias) {
            Ok(current) if current == target => AliasOutcome::Unchanged,
            Ok(current) => {
                replace_symlink(alias, target)?;
                AliasOutcome::Retargeted { previous: current }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = alias.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        MountError::io(format!("Failed to create {}", parent.display()), e)
                    })?;
                }
                replace_symlink(alias, target)?;
                AliasOutcome::Created
            }
            Err(e) => {
                return Err(MountError::io(format!("Failed to read {}", alias.display()), e));
            }
        };

        if let Err(e) = verify_resolves_to(alias, target) {
            roll_back(alias, &outcome);
            return Err(e);
        }
        match &outcome {
            AliasOutcome::Created => {
                tracing::info!(alias = %alias.display(), target = %target.display(), "Alias created");
            }
            AliasOutcome::Retargeted { previous } => tracing::info!(
                alias = %alias.display(),
                previous = %previous.display(),
                target = %target.display(),
                "Alias retargeted"
            ),
            AliasOutcome::Unchanged => tracing::debug!(alias = %alias.display(), "Alias already correct"),
        }
        Ok(outcome)
    }

    /// Remove `alias` if and only if it is a symlink.
    pub fn remove_alias(&self, alias: &Path) -> MountResult<AliasRemoval> {
        match std::fs::symlink_metadata(alias) {
            Ok(meta) if meta.file_type().is_symlink() => {
                std::fs::remove_file(alias)
                    .map_err(|e| MountError::io(format!("Failed to remove {}", alias.display()), e))?;
                tracing::info!(alias = %alias.display(), "Alias removed");
                Ok(AliasRemoval::Removed)
            }
            Ok(_) => {
                tracing::warn!(
                    alias = %alias.display(),
                    "Not a symlink, leaving it untouched"
                );
                Ok(AliasRemoval::NotASymlink)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AliasRemoval::Missing),
            Err(e) => Err(MountError::io(format!("Failed to inspect {}", alias.display()), e)),
        }
    }

    /// Describe what exists at `alias` relative to `mount_point`.
    pub fn inspect(&self, alias: &Path, mount_point: &Path) -> MountResult<AliasState> {
        match std::fs::read_link(alias) {
            Ok(target) => Ok(AliasState::Symlink {
                resolves_to_mount: verify_resolves_to(alias, mount_point).is_ok(),
                target,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AliasState::Missing),
            // EINVAL: exists but is not a symlink
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(AliasState::NotASymlink),
            Err(e) => Err(MountError::io(format!("Failed to inspect {}", alias.display()), e)),
        }
    }
}

/// Suffix counter keeping temp link names unique across threads.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Undo an alias write that does not resolve to its mount point.
fn roll_back(alias: &Path, outcome: &AliasOutcome) {
    let restored = match outcome {
        AliasOutcome::Created => std::fs::remove_file(alias)
            .map_err(|e| MountError::io(format!("Failed to remove {}", alias.display()), e)),
        AliasOutcome::Retargeted { previous } => replace_symlink(alias, previous),
        AliasOutcome::Unchanged => return,
    };
    if let Err(e) = restored {
        tracing::warn!(alias = %alias.display(), error = %e, "Failed to roll back alias");
    }
}

/// Write a temporary symlink beside `alias` and rename it into place.
fn replace_symlink(alias: &Path, target: &Path) -> MountResult<()> {
    let name = alias
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = alias.with_file_name(format!(
        ".{name}.tmp-{}-{}",
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    // A previous interrupted attempt may have left the temp link behind.
    let _ = std::fs::remove_file(&tmp);
    symlink(target, &tmp)
        .map_err(|e| MountError::io(format!("Failed to create symlink {}", tmp.display()), e))?;

    if let Err(e) = std::fs::rename(&tmp, alias) {
        let _ = std::fs::remove_file(&tmp);
        return Err(MountError::io(
            format!("Failed to move symlink into place at {}", alias.display()),
            e,
        ));
    }
    Ok(())
}

fn verify_resolves_to(alias: &Path, target: &Path) -> MountResult<()> {
    let resolved = std::fs::canonicalize(alias)
        .map_err(|e| MountError::io(format!("Failed to resolve alias {}", alias.display()), e))?;
    let expected = std::fs::canonicalize(target)
        .map_err(|e| MountError::io(format!("Failed to resolve {}", target.display()), e))?;

    if resolved != expected {
        return Err(MountError::AliasMismatch {
            alias: alias.to_path_buf(),
            resolved,
            expected,
        });
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}
