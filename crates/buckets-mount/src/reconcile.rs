//! Mount-state reconciliation.
//!
//! Each request drives the node's filesystem toward a desired state using
//! only what can be observed right now: the mount table, the process table
//! and the directories under the mount root. Every mutating step is safe to
//! repeat, and every destructive step re-checks its precondition first, so
//! concurrent or interrupted requests converge when retried.
//!
//! ```text
//! mount:    NoMount ──start──▶ Mounting ──ready──▶ Active ──alias──▶ done
//!                                  │
//!                                  └──fail/timeout──▶ error (no alias)
//! unmount:  Active ──terminate, stop──▶ NoMount ──▶ alias removed
//! ```

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::backend::{BackendController, StartOutcome, StopOutcome};
use crate::config::EngineConfig;
use crate::error::{MountError, MountResult};
use crate::force_unmount::UnmountMode;
use crate::host::Host;
use crate::layout::{BucketName, MountLayout};
use crate::probe::{MountProbe, MountState};
use crate::symlink::{AliasOutcome, AliasRemoval, AliasState, SymlinkManager};

/// Which scopes an unmount applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnmountScope {
    /// Only the current scope's mount point.
    #[default]
    Current,
    /// Every scope directory on this host.
    AllScopes,
}

/// Successful mount request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountOutcome {
    pub bucket: BucketName,
    /// The alias the caller should use
    pub alias: PathBuf,
    pub mount_point: PathBuf,
    /// True if an existing mount was reused and no backend was started
    pub reused: bool,
    /// What happened to the alias
    pub alias_change: AliasOutcome,
    pub log_file: PathBuf,
}

/// Per-mount-point result of an unmount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum CandidateResult {
    /// An active mount was detached.
    Stopped {
        lazy: bool,
        terminated: usize,
    },
    /// Nothing was mounted.
    AlreadyInactive { terminated: usize },
    /// Detaching failed; the mount is still present.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateOutcome {
    pub mount_point: PathBuf,
    #[serde(flatten)]
    pub result: CandidateResult,
    /// The emptied mount point directory was removed
    pub removed_dir: bool,
}

/// Result of an unmount request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmountReport {
    pub bucket: BucketName,
    pub candidates: Vec<CandidateOutcome>,
    /// Alias path and what was done with it, unless alias removal was skipped
    pub alias: Option<(PathBuf, AliasRemoval)>,
}

impl UnmountReport {
    /// True if any candidate could not be detached.
    pub fn has_failures(&self) -> bool {
        self.candidates
            .iter()
            .any(|c| matches!(c.result, CandidateResult::Failed { .. }))
    }

    /// Number of mounts that were actually detached.
    pub fn stopped(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| matches!(c.result, CandidateResult::Stopped { .. }))
            .count()
    }
}

/// One bucket directory under the mount root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountEntry {
    pub bucket: String,
    pub scope: String,
    pub mount_point: PathBuf,
    pub state: MountState,
    /// Belongs to the scope of this invocation
    pub current_scope: bool,
}

/// Detailed state of one bucket for the current scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub bucket: BucketName,
    pub scope: String,
    pub mount_point: PathBuf,
    pub state: MountState,
    pub source: Option<String>,
    pub backend_pids: Vec<u32>,
    pub log_file: PathBuf,
    pub alias: PathBuf,
    pub alias_state: AliasState,
    /// The same bucket mounted in other scopes on this host
    pub other_scopes: Vec<MountEntry>,
}

/// Drives mount and unmount requests for one node identity.
#[derive(Debug, Clone)]
pub struct Reconciler {
    layout: MountLayout,
    host: Host,
    probe: MountProbe,
    controller: BackendController,
    aliases: SymlinkManager,
}

impl Reconciler {
    pub fn new(layout: MountLayout, host: Host, config: EngineConfig) -> Self {
        let probe = host.probe();
        let controller = host.controller(config);
        let aliases = SymlinkManager::new(probe.clone());
        Self {
            layout,
            host,
            probe,
            controller,
            aliases,
        }
    }

    pub fn layout(&self) -> &MountLayout {
        &self.layout
    }

    pub fn controller(&self) -> &BackendController {
        &self.controller
    }

    /// Make `bucket` available at `<root>/<bucket>`.
    ///
    /// Reuses a live mount of the bucket in the current scope, otherwise
    /// starts one. No alias is written unless the mount is active.
    #[tracing::instrument(level = "info", skip_all, fields(bucket = %bucket))]
    pub fn mount(&self, bucket: &BucketName, root: &Path) -> MountResult<MountOutcome> {
        let mount_point = self.layout.mount_point(bucket);
        let alias = self.layout.alias_path(root, bucket);
        let log_file = self.layout.log_file(bucket);

        self.aliases.check_alias(&alias)?;

        let reused = match self.probe.state(&mount_point)? {
            MountState::Mounted => {
                tracing::info!(mount_point = %mount_point.display(), "Reusing active mount");
                true
            }
            MountState::Disconnected => {
                self.detach_stale(&mount_point)?;
                self.bring_up(bucket, &mount_point, &log_file)?
            }
            MountState::Symlink => {
                self.layout.verify_owned(&mount_point)?;
                tracing::warn!(mount_point = %mount_point.display(), "Replacing symlink at mount point");
                std::fs::remove_file(&mount_point).map_err(|e| {
                    MountError::io(format!("Failed to remove {}", mount_point.display()), e)
                })?;
                self.bring_up(bucket, &mount_point, &log_file)?
            }
            MountState::Plain | MountState::Missing => {
                self.bring_up(bucket, &mount_point, &log_file)?
            }
        };

        let alias_change = self.aliases.ensure_alias(&alias, &mount_point)?;
        Ok(MountOutcome {
            bucket: bucket.clone(),
            alias,
            mount_point,
            reused,
            alias_change,
            log_file,
        })
    }

    /// Prepare the mount point and start the backend. Returns `true` if a
    /// mount that appeared concurrently was reused instead.
    fn bring_up(&self, bucket: &BucketName, mount_point: &Path, log_file: &Path) -> MountResult<bool> {
        self.layout.verify_owned(mount_point)?;
        std::fs::create_dir_all(mount_point).map_err(|e| {
            MountError::io(format!("Failed to create mount point {}", mount_point.display()), e)
        })?;

        if self.probe.is_active_mount(mount_point)? || self.clear_stale_contents(mount_point)? {
            return Ok(true);
        }

        match self.controller.start_mount(bucket, mount_point, log_file)? {
            StartOutcome::Started { pid } => {
                tracing::info!(pid, "Backend started");
                Ok(false)
            }
            StartOutcome::AlreadyActive => Ok(true),
        }
    }

    /// Lazily detach a mount whose backend died and stop any leftovers.
    fn detach_stale(&self, mount_point: &Path) -> MountResult<()> {
        self.layout.verify_owned(mount_point)?;
        tracing::warn!(mount_point = %mount_point.display(), "Cleaning up stale mount");
        self.controller.terminate_serving(mount_point);

        if let Err(e) = self.host.backend().unmount(mount_point, UnmountMode::Lazy)
            && self.probe.is_active_mount(mount_point)?
        {
            return Err(e);
        }
        Ok(())
    }

    /// Empty a mount point left with files by a crashed run.
    ///
    /// Only ever applied to a constructed mount point that is confirmed not
    /// mounted immediately beforehand. Returns `true`, without touching
    /// anything, if a concurrent request mounted it in the meantime: the
    /// listed entries are then the bucket's objects.
    fn clear_stale_contents(&self, mount_point: &Path) -> MountResult<bool> {
        self.layout.verify_owned(mount_point)?;
        let entries: Vec<_> = std::fs::read_dir(mount_point)
            .map_err(|e| MountError::io(format!("Failed to read {}", mount_point.display()), e))?
            .collect::<io::Result<_>>()
            .map_err(|e| MountError::io(format!("Failed to read {}", mount_point.display()), e))?;
        if entries.is_empty() {
            return Ok(false);
        }

        match self.probe.state(mount_point)? {
            MountState::Plain => {}
            MountState::Mounted => {
                tracing::info!(
                    mount_point = %mount_point.display(),
                    "Mount appeared concurrently, reusing it"
                );
                return Ok(true);
            }
            _ => {
                return Err(MountError::io(
                    format!("{} changed state while preparing it", mount_point.display()),
                    io::Error::from(io::ErrorKind::ResourceBusy),
                ));
            }
        }

        tracing::warn!(
            mount_point = %mount_point.display(),
            count = entries.len(),
            "Clearing stale contents of unmounted mount point"
        );
        for entry in entries {
            let path = entry.path();
            let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
            let result = if is_dir {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(MountError::io(format!("Failed to remove {}", path.display()), e));
                }
            }
        }
        Ok(false)
    }

    /// Stop serving `bucket` and optionally remove its alias under `root`.
    ///
    /// Mount points that are already inactive count as success.
    #[tracing::instrument(level = "info", skip_all, fields(bucket = %bucket, scope = ?scope))]
    pub fn unmount(
        &self,
        bucket: &BucketName,
        root: Option<&Path>,
        scope: UnmountScope,
    ) -> MountResult<UnmountReport> {
        let candidates = match scope {
            UnmountScope::Current => vec![self.layout.mount_point(bucket)],
            UnmountScope::AllScopes => {
                let mut all = self.layout.mount_points_all_scopes(bucket)?;
                let current = self.layout.mount_point(bucket);
                if !all.contains(&current) {
                    all.push(current);
                }
                all
            }
        };

        let candidates = candidates
            .into_iter()
            .map(|mount_point| self.unmount_one(&mount_point))
            .collect();

        let alias = match root {
            Some(root) => {
                let alias = self.layout.alias_path(root, bucket);
                let removal = self.aliases.remove_alias(&alias)?;
                Some((alias, removal))
            }
            None => None,
        };

        Ok(UnmountReport {
            bucket: bucket.clone(),
            candidates,
            alias,
        })
    }

    fn unmount_one(&self, mount_point: &Path) -> CandidateOutcome {
        // The backend unmounts on SIGTERM; stop_mount handles what remains.
        let terminated_first = self.controller.terminate_serving(mount_point);

        let result = match self.controller.stop_mount(mount_point) {
            Ok(StopOutcome::Stopped { lazy, terminated }) => CandidateResult::Stopped {
                lazy,
                terminated: terminated + terminated_first,
            },
            Ok(StopOutcome::AlreadyInactive { terminated }) if terminated_first > 0 => {
                // Terminating the backend is what detached it.
                CandidateResult::Stopped {
                    lazy: false,
                    terminated: terminated + terminated_first,
                }
            }
            Ok(StopOutcome::AlreadyInactive { terminated }) => {
                CandidateResult::AlreadyInactive { terminated }
            }
            Err(e) => {
                tracing::error!(mount_point = %mount_point.display(), "Unmount failed: {e}");
                CandidateResult::Failed {
                    error: e.to_string(),
                }
            }
        };

        let removed_dir = !matches!(result, CandidateResult::Failed { .. })
            && self.remove_empty_mount_point(mount_point);

        CandidateOutcome {
            mount_point: mount_point.to_path_buf(),
            result,
            removed_dir,
        }
    }

    /// Remove an unmounted, empty mount point directory.
    fn remove_empty_mount_point(&self, mount_point: &Path) -> bool {
        if self.layout.verify_owned(mount_point).is_err() {
            return false;
        }
        if !matches!(self.probe.state(mount_point), Ok(MountState::Plain)) {
            return false;
        }
        match std::fs::remove_dir(mount_point) {
            Ok(()) => {
                tracing::debug!(mount_point = %mount_point.display(), "Removed mount point directory");
                true
            }
            Err(e) => {
                tracing::debug!(mount_point = %mount_point.display(), "Kept mount point directory: {e}");
                false
            }
        }
    }

    /// Unmount every bucket that has a mount point directory in scope.
    pub fn unmount_all(
        &self,
        root: Option<&Path>,
        scope: UnmountScope,
    ) -> MountResult<Vec<UnmountReport>> {
        let current = self.layout.identity().scope();
        let buckets: BTreeSet<String> = self
            .list()?
            .into_iter()
            .filter(|e| scope == UnmountScope::AllScopes || e.scope == current)
            .map(|e| e.bucket)
            .collect();

        buckets
            .iter()
            .map(|name| {
                let bucket = BucketName::parse(name)?;
                self.unmount(&bucket, root, scope)
            })
            .collect()
    }

    /// Remove the alias for `bucket` under `root` without unmounting.
    pub fn unlink(&self, bucket: &BucketName, root: &Path) -> MountResult<(PathBuf, AliasRemoval)> {
        let alias = self.layout.alias_path(root, bucket);
        let removal = self.aliases.remove_alias(&alias)?;
        Ok((alias, removal))
    }

    /// Every bucket directory under this host's mount root, all scopes.
    pub fn list(&self) -> MountResult<Vec<MountEntry>> {
        let current = self.layout.identity().scope();
        let host_root = self.layout.host_root();
        let mut entries = Vec::new();

        for scope in self.layout.scopes()? {
            let scope_dir = host_root.join(&scope);
            let dir = match std::fs::read_dir(&scope_dir) {
                Ok(dir) => dir,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(MountError::io(format!("Failed to read {}", scope_dir.display()), e));
                }
            };

            for item in dir.filter_map(Result::ok) {
                let Ok(bucket) = item.file_name().into_string() else {
                    continue;
                };
                let mount_point = item.path();
                let state = self.probe.state(&mount_point)?;
                if matches!(state, MountState::Missing | MountState::Symlink) {
                    continue;
                }
                entries.push(MountEntry {
                    bucket,
                    current_scope: scope == current,
                    scope: scope.clone(),
                    mount_point,
                    state,
                });
            }
        }

        entries.sort_by(|a, b| (&a.bucket, &a.scope).cmp(&(&b.bucket, &b.scope)));
        Ok(entries)
    }

    /// Current state of `bucket` in this scope and its alias under `root`.
    pub fn status(&self, bucket: &BucketName, root: &Path) -> MountResult<StatusReport> {
        let mount_point = self.layout.mount_point(bucket);
        let alias = self.layout.alias_path(root, bucket);
        let state = self.probe.state(&mount_point)?;
        let source = self.probe.entry(&mount_point)?.map(|m| m.fsname);
        let backend_pids = self
            .controller
            .serving_processes(&mount_point)?
            .into_iter()
            .map(|p| p.pid)
            .collect();
        let alias_state = self.aliases.inspect(&alias, &mount_point)?;
        let other_scopes = self
            .list()?
            .into_iter()
            .filter(|e| e.bucket == bucket.as_str() && !e.current_scope)
            .collect();

        Ok(StatusReport {
            bucket: bucket.clone(),
            scope: self.layout.identity().scope(),
            log_file: self.layout.log_file(bucket),
            mount_point,
            state,
            source,
            backend_pids,
            alias,
            alias_state,
            other_scopes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount_markers::MountTable;
    use crate::testing::{StartBehavior, TestNode};

    fn bucket(name: &str) -> BucketName {
        BucketName::parse(name).unwrap()
    }

    #[test]
    fn test_mount_creates_mount_and_alias() {
        let node = TestNode::new();
        let root = node.alias_root("data");
        let outcome = node.reconciler().mount(&bucket("b"), &root).unwrap();

        assert!(!outcome.reused);
        assert_eq!(outcome.alias_change, AliasOutcome::Created);
        assert_eq!(outcome.alias, root.join("b"));
        assert!(node.probe().is_active_mount(&outcome.mount_point).unwrap());
    }

    #[test]
    fn test_mount_twice_reuses() {
        let node = TestNode::new();
        let root = node.alias_root("data");
        let reconciler = node.reconciler();

        reconciler.mount(&bucket("b"), &root).unwrap();
        let second = reconciler.mount(&bucket("b"), &root).unwrap();

        assert!(second.reused);
        assert_eq!(second.alias_change, AliasOutcome::Unchanged);
        assert_eq!(node.backend.spawn_count(), 1);
        assert_eq!(node.table.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_start_creates_no_alias() {
        let node = TestNode::new();
        node.backend.set_behavior(StartBehavior::ExitWithError);
        let root = node.alias_root("data");

        let err = node.reconciler().mount(&bucket("b"), &root).unwrap_err();
        assert!(matches!(err, MountError::StartupFailed { .. }));
        assert!(std::fs::symlink_metadata(root.join("b")).is_err());
        // Mount point stays, empty, for diagnosis.
        let mp = node.layout.mount_point(&bucket("b"));
        assert!(mp.is_dir());
        assert_eq!(std::fs::read_dir(&mp).unwrap().count(), 0);
    }

    #[test]
    fn test_stale_contents_cleared_before_mount() {
        let node = TestNode::new();
        let mp = node.layout.mount_point(&bucket("b"));
        std::fs::create_dir_all(mp.join("leftover-dir")).unwrap();
        std::fs::write(mp.join("leftover.txt"), b"old").unwrap();

        node.reconciler().mount(&bucket("b"), &node.alias_root("data")).unwrap();
        assert_eq!(node.backend.entries_at_last_spawn(), Some(0));
    }

    #[test]
    fn test_mount_rejects_alias_directory() {
        let node = TestNode::new();
        let root = node.alias_root("data");
        std::fs::create_dir(root.join("b")).unwrap();

        let err = node.reconciler().mount(&bucket("b"), &root).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(node.backend.spawn_count(), 0);
        assert!(root.join("b").is_dir());
    }

    #[test]
    fn test_unmount_current_scope() {
        let node = TestNode::new();
        let root = node.alias_root("data");
        let reconciler = node.reconciler();
        let outcome = reconciler.mount(&bucket("b"), &root).unwrap();

        let report = reconciler.unmount(&bucket("b"), Some(&root), UnmountScope::Current).unwrap();
        assert_eq!(report.stopped(), 1);
        assert!(!report.has_failures());
        assert_eq!(report.alias, Some((root.join("b"), AliasRemoval::Removed)));
        assert!(!node.probe().is_active_mount(&outcome.mount_point).unwrap());
        assert!(!outcome.mount_point.exists());
    }

    #[test]
    fn test_unmount_nothing_is_success() {
        let node = TestNode::new();
        let root = node.alias_root("data");
        let report = node
            .reconciler()
            .unmount(&bucket("never-mounted"), Some(&root), UnmountScope::AllScopes)
            .unwrap();

        assert!(!report.has_failures());
        assert_eq!(report.stopped(), 0);
        assert_eq!(report.alias, Some((root.join("never-mounted"), AliasRemoval::Missing)));
    }

    #[test]
    fn test_unmount_keep_alias() {
        let node = TestNode::new();
        let root = node.alias_root("data");
        let reconciler = node.reconciler();
        reconciler.mount(&bucket("b"), &root).unwrap();

        let report = reconciler.unmount(&bucket("b"), None, UnmountScope::Current).unwrap();
        assert!(report.alias.is_none());
        assert!(std::fs::symlink_metadata(root.join("b")).unwrap().file_type().is_symlink());
    }

    #[test]
    fn test_unlink_keeps_mount() {
        let node = TestNode::new();
        let root = node.alias_root("data");
        let reconciler = node.reconciler();
        let outcome = reconciler.mount(&bucket("b"), &root).unwrap();

        let (alias, removal) = reconciler.unlink(&bucket("b"), &root).unwrap();
        assert_eq!(alias, root.join("b"));
        assert_eq!(removal, AliasRemoval::Removed);
        assert!(node.probe().is_active_mount(&outcome.mount_point).unwrap());
    }

    #[test]
    fn test_list_and_status() {
        let node = TestNode::new();
        let root = node.alias_root("data");
        let reconciler = node.reconciler();
        reconciler.mount(&bucket("alpha"), &root).unwrap();
        std::fs::create_dir_all(node.layout.mount_point(&bucket("idle"))).unwrap();

        let listing = reconciler.list().unwrap();
        let summary: Vec<_> = listing.iter().map(|e| (e.bucket.as_str(), e.state)).collect();
        assert_eq!(summary, vec![("alpha", MountState::Mounted), ("idle", MountState::Plain)]);
        assert!(listing.iter().all(|e| e.current_scope && e.scope == "shared"));

        let status = reconciler.status(&bucket("alpha"), &root).unwrap();
        assert_eq!(status.state, MountState::Mounted);
        assert_eq!(status.source.as_deref(), Some("remote:alpha"));
        assert_eq!(status.backend_pids.len(), 1);
        assert!(matches!(
            status.alias_state,
            AliasState::Symlink { resolves_to_mount: true, .. }
        ));
    }

    #[test]
    fn test_unmount_all_current_scope() {
        let node = TestNode::new();
        let root = node.alias_root("data");
        let reconciler = node.reconciler();
        reconciler.mount(&bucket("a"), &root).unwrap();
        reconciler.mount(&bucket("b"), &root).unwrap();

        let reports = reconciler.unmount_all(Some(&root), UnmountScope::Current).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(node.table.entries().unwrap().is_empty());
        assert!(reconciler.list().unwrap().is_empty());
    }
}
