//! Sweep command - find and repair orphaned rclone mounts.
//!
//! # Examples
//!
//! ```bash
//! # Report only, changes nothing
//! buckets sweep
//!
//! # Lazily unmount orphans and prune their directories
//! buckets sweep --fix
//! ```

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::{Cell, Color};
use tracing::instrument;

use buckets_mount::{FixAction, MountError, MountHealth, SweepMode, SweepReport};

use super::Session;
use crate::output::{create_table, print_json};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Repair orphaned mounts instead of only reporting them
    #[arg(long)]
    pub fix: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::sweep", skip_all, fields(fix = args.fix))]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let mode = if args.fix { SweepMode::Fix } else { SweepMode::Report };
    let report = session.sweep().run(mode)?;

    if args.json {
        print_json(&report)?;
    } else if report.entries.is_empty() {
        session.note("No rclone mounts found");
    } else {
        output_table(&report);
        summarize(session, &report, args.fix);
    }

    if report.failed() > 0 {
        return Err(MountError::UnmountFailed(format!(
            "{} orphaned mount(s) could not be repaired",
            report.failed()
        ))
        .into());
    }
    Ok(())
}

fn output_table(report: &SweepReport) {
    let mut table = create_table();
    table.set_header(vec!["Source", "Mount Point", "Status", "Action"]);

    for entry in &report.entries {
        let status = match entry.status {
            MountHealth::Healthy => Cell::new("healthy").fg(Color::Green),
            MountHealth::Orphan => Cell::new("orphan").fg(Color::Red),
        };
        let action = match &entry.action {
            None => String::new(),
            Some(FixAction::Repaired { pruned, .. }) if pruned.is_empty() => "unmounted".to_string(),
            Some(FixAction::Repaired { pruned, .. }) => {
                format!("unmounted, removed {} dir(s)", pruned.len())
            }
            Some(FixAction::AlreadyResolved) => "already gone".to_string(),
            Some(FixAction::Failed { error }) => format!("failed: {error}"),
        };
        table.add_row(vec![
            Cell::new(&entry.source),
            Cell::new(entry.mount_point.display()),
            status,
            Cell::new(action),
        ]);
    }

    println!("{table}");
}

fn summarize(session: &Session, report: &SweepReport, fixed: bool) {
    let (healthy, orphans) = (report.healthy(), report.orphans());
    if fixed {
        session.note(format_args!(
            "\n{healthy} healthy, {orphans} orphaned, {} repaired",
            report.repaired()
        ));
    } else if orphans > 0 {
        session.note(format_args!(
            "\n{healthy} healthy, {orphans} orphaned (run with --fix to repair)"
        ));
    } else {
        session.note(format_args!("\n{healthy} healthy"));
    }
}
