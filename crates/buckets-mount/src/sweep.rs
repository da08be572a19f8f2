//! Zombie sweep: find and repair backend mounts whose process has died.
//!
//! A mount is healthy when a running backend process names its bucket
//! (and its mount point, when the command line carries one). Otherwise it
//! is an orphan. Report mode never mutates anything. Fix mode terminates
//! stragglers, lazily unmounts, and prunes the emptied directories inside
//! the user mount root.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::MountResult;
use crate::force_unmount::UnmountMode;
use crate::host::Host;
use crate::layout::{normalize_mount_path, MountLayout};
use crate::mount_markers::SystemMount;
use crate::process_detection::ProcessInfo;

/// Directories pruned above an orphan: mount point, scope, host.
const PRUNE_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepMode {
    /// Classify only.
    #[default]
    Report,
    /// Classify and repair orphans.
    Fix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountHealth {
    /// A backend process serves this mount.
    Healthy,
    /// No backend process serves this mount.
    Orphan,
}

/// What fix mode did with an orphan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum FixAction {
    /// Unmounted; `pruned` lists removed directories, innermost first.
    Repaired { terminated: usize, pruned: Vec<PathBuf> },
    /// The mount vanished before it could be fixed.
    AlreadyResolved,
    /// The mount is still present.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepEntry {
    /// Mount table source, e.g. `s3_remote:data`
    pub source: String,
    pub mount_point: PathBuf,
    pub bucket: Option<String>,
    pub status: MountHealth,
    /// Backend processes serving this mount
    pub pids: Vec<u32>,
    pub action: Option<FixAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SweepReport {
    pub entries: Vec<SweepEntry>,
}

impl SweepReport {
    pub fn healthy(&self) -> usize {
        self.count(|e| e.status == MountHealth::Healthy)
    }

    pub fn orphans(&self) -> usize {
        self.count(|e| e.status == MountHealth::Orphan)
    }

    pub fn repaired(&self) -> usize {
        self.count(|e| matches!(e.action, Some(FixAction::Repaired { .. } | FixAction::AlreadyResolved)))
    }

    pub fn failed(&self) -> usize {
        self.count(|e| matches!(e.action, Some(FixAction::Failed { .. })))
    }

    fn count(&self, pred: impl Fn(&SweepEntry) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(e)).count()
    }
}

/// Node-wide audit of this user's backend mounts.
#[derive(Debug, Clone)]
pub struct ZombieSweep {
    layout: MountLayout,
    host: Host,
    config: EngineConfig,
}

impl ZombieSweep {
    pub fn new(layout: MountLayout, host: Host, config: EngineConfig) -> Self {
        Self {
            layout,
            host,
            config,
        }
    }

    /// Classify every backend mount owned by the current user.
    pub fn scan(&self) -> MountResult<Vec<SweepEntry>> {
        let backend = self.host.backend();
        let mounts: Vec<SystemMount> = self
            .host
            .mounts()
            .entries()?
            .into_iter()
            .filter(|m| backend.owns_mount(m) && self.owned_by_user(m))
            .collect();
        if mounts.is_empty() {
            return Ok(Vec::new());
        }

        let processes = self.host.processes().list()?;
        Ok(mounts
            .into_iter()
            .map(|mount| {
                let bucket = backend.bucket_of_source(&mount.fsname);
                let pids = self.serving_pids(&processes, bucket.as_deref(), &mount.mountpoint);
                let status = if pids.is_empty() {
                    MountHealth::Orphan
                } else {
                    MountHealth::Healthy
                };
                SweepEntry {
                    source: mount.fsname,
                    mount_point: mount.mountpoint,
                    bucket,
                    status,
                    pids,
                    action: None,
                }
            })
            .collect())
    }

    /// Classify, and in [`SweepMode::Fix`] repair every orphan.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn run(&self, mode: SweepMode) -> MountResult<SweepReport> {
        let mut entries = self.scan()?;
        tracing::info!(
            total = entries.len(),
            orphans = entries.iter().filter(|e| e.status == MountHealth::Orphan).count(),
            "Sweep classified backend mounts"
        );

        if mode == SweepMode::Fix {
            for entry in entries.iter_mut().filter(|e| e.status == MountHealth::Orphan) {
                entry.action = Some(self.fix_orphan(&entry.mount_point));
            }
        }
        Ok(SweepReport { entries })
    }

    fn fix_orphan(&self, mount_point: &Path) -> FixAction {
        tracing::info!(mount_point = %mount_point.display(), "Repairing orphaned mount");
        let terminated = self.terminate_stragglers(mount_point);

        match self.host.mounts().find(mount_point) {
            Ok(Some(_)) => {}
            Ok(None) => return FixAction::AlreadyResolved,
            Err(e) => return FixAction::Failed { error: e.to_string() },
        }

        if let Err(e) = self.host.backend().unmount(mount_point, UnmountMode::Lazy) {
            return match self.host.mounts().find(mount_point) {
                Ok(None) => FixAction::AlreadyResolved,
                _ => {
                    tracing::error!(mount_point = %mount_point.display(), "Lazy unmount failed: {e}");
                    FixAction::Failed { error: e.to_string() }
                }
            };
        }

        FixAction::Repaired {
            terminated,
            pruned: self.prune(mount_point),
        }
    }

    /// Terminate processes that still name this mount point.
    fn terminate_stragglers(&self, mount_point: &Path) -> usize {
        let processes = match self.host.processes().list() {
            Ok(processes) => processes,
            Err(e) => {
                tracing::warn!("Cannot list processes: {e}");
                return 0;
            }
        };
        let wanted = normalize_mount_path(mount_point);

        let mut terminated = 0;
        for process in &processes {
            let names_mount = self
                .host
                .backend()
                .served_mount(process)
                .and_then(|s| s.mount_point)
                .is_some_and(|mp| normalize_mount_path(&mp) == wanted);
            if names_mount && self.host.processes().terminate(process.pid, self.config.terminate_grace) {
                tracing::info!(pid = process.pid, "Terminated stale backend process");
                terminated += 1;
            }
        }
        terminated
    }

    /// Remove the emptied mount point and up to two empty parents, never
    /// leaving the user mount root.
    fn prune(&self, mount_point: &Path) -> Vec<PathBuf> {
        let mut pruned = Vec::new();
        let mut current = Some(mount_point);

        for _ in 0..PRUNE_DEPTH {
            let Some(dir) = current else { break };
            if !self.layout.owns(dir) {
                break;
            }
            match std::fs::remove_dir(dir) {
                Ok(()) => pruned.push(dir.to_path_buf()),
                Err(e) => {
                    tracing::debug!(dir = %dir.display(), "Stopped pruning: {e}");
                    break;
                }
            }
            current = dir.parent();
        }
        pruned
    }

    fn owned_by_user(&self, mount: &SystemMount) -> bool {
        let identity = self.layout.identity();
        match (mount.owner_uid(), mount.owner_name()) {
            (Some(uid), _) => uid == identity.uid,
            (None, Some(name)) => name == identity.user,
            (None, None) => self.layout.owns(&mount.mountpoint),
        }
    }

    fn serving_pids(&self, processes: &[ProcessInfo], bucket: Option<&str>, mount_point: &Path) -> Vec<u32> {
        let Some(bucket) = bucket else {
            return Vec::new();
        };
        let wanted = normalize_mount_path(mount_point);
        let backend = self.host.backend();

        processes
            .iter()
            .filter(|p| {
                backend.served_mount(p).is_some_and(|served| {
                    served.bucket == bucket
                        && served
                            .mount_point
                            .is_none_or(|mp| mp == wanted || normalize_mount_path(&mp) == wanted)
                })
            })
            .map(|p| p.pid)
            .collect()
    }
}
