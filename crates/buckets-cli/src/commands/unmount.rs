//! Unmount command - stop serving a bucket and remove its alias.
//!
//! Unmounting something that is not mounted succeeds. A busy mount is
//! detached lazily. Aliases are only removed when they are symlinks.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use buckets_mount::{AliasRemoval, CandidateResult, MountError, UnmountReport, UnmountScope};

use super::{parse_bucket, resolve_root, Session};
use crate::output::print_json;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Bucket to unmount
    #[arg(required_unless_present = "all")]
    pub bucket: Option<String>,

    /// Unmount every bucket mounted in scope
    #[arg(short, long, conflicts_with = "bucket")]
    pub all: bool,

    /// Include mounts made by other jobs on this host
    #[arg(long)]
    pub all_scopes: bool,

    /// Leave the alias symlink in place
    #[arg(long, visible_alias = "keep-symlinks")]
    pub keep_alias: bool,

    /// Directory holding the alias (default: current directory)
    #[arg(short, long, value_name = "DIR", conflicts_with = "keep_alias")]
    pub root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::unmount", skip_all, fields(all = args.all, all_scopes = args.all_scopes))]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let scope = if args.all_scopes {
        UnmountScope::AllScopes
    } else {
        UnmountScope::Current
    };
    let root = if args.keep_alias {
        None
    } else {
        Some(resolve_root(args.root.as_deref())?)
    };
    let reconciler = session.reconciler();

    let reports = match &args.bucket {
        Some(name) if !args.all => {
            let bucket = parse_bucket(name)?;
            vec![reconciler
                .unmount(&bucket, root.as_deref(), scope)
                .with_context(|| format!("Failed to unmount {bucket}"))?]
        }
        _ => reconciler.unmount_all(root.as_deref(), scope)?,
    };

    if args.json {
        print_json(&reports)?;
    } else if reports.is_empty() {
        session.note("No buckets to unmount");
    } else {
        for report in &reports {
            describe(session, report);
        }
    }

    let failed: Vec<String> = reports
        .iter()
        .flat_map(|r| &r.candidates)
        .filter_map(|c| match &c.result {
            CandidateResult::Failed { error } => {
                Some(format!("{}: {error}", c.mount_point.display()))
            }
            _ => None,
        })
        .collect();
    if !failed.is_empty() {
        return Err(MountError::UnmountFailed(failed.join("; ")).into());
    }
    Ok(())
}

fn describe(session: &Session, report: &UnmountReport) {
    let bucket = &report.bucket;
    for candidate in &report.candidates {
        let mp = candidate.mount_point.display();
        match &candidate.result {
            CandidateResult::Stopped { lazy: false, .. } => {
                session.note(format_args!("Unmounted {bucket} from {mp}"));
            }
            CandidateResult::Stopped { lazy: true, .. } => {
                session.note(format_args!(
                    "Unmounted {bucket} from {mp} (busy, detached lazily)"
                ));
            }
            CandidateResult::AlreadyInactive { .. } => {
                tracing::info!("{bucket} was not mounted at {mp}");
            }
            CandidateResult::Failed { error } => {
                eprintln!("Failed to unmount {bucket} from {mp}: {error}");
            }
        }
    }

    if report.stopped() == 0 && !report.has_failures() {
        session.note(format_args!("{bucket} was not mounted"));
    }

    if let Some((alias, removal)) = &report.alias {
        match removal {
            AliasRemoval::Removed => session.note(format_args!("Removed alias {}", alias.display())),
            AliasRemoval::Missing => {}
            AliasRemoval::NotASymlink => eprintln!(
                "Warning: {} is not a symlink, left untouched",
                alias.display()
            ),
        }
    }
}
