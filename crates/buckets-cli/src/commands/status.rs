//! Status command - mount and alias state of one bucket.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::Cell;
use tracing::instrument;

use buckets_mount::{AliasState, StatusReport};

use super::{parse_bucket, resolve_root, Session};
use crate::output::{create_table, print_json, state_cell};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Bucket name
    pub bucket: String,

    /// Directory holding the alias (default: current directory)
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::status", skip_all, fields(bucket = %args.bucket))]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let bucket = parse_bucket(&args.bucket)?;
    let root = resolve_root(args.root.as_deref())?;
    let report = session.reconciler().status(&bucket, &root)?;

    if args.json {
        print_json(&report)
    } else {
        output_table(&report);
        Ok(())
    }
}

fn output_table(report: &StatusReport) {
    let mut table = create_table();
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec![Cell::new("Bucket"), Cell::new(&report.bucket)]);
    table.add_row(vec![Cell::new("Scope"), Cell::new(&report.scope)]);
    table.add_row(vec![Cell::new("Mount point"), Cell::new(report.mount_point.display())]);
    table.add_row(vec![Cell::new("State"), state_cell(report.state)]);
    table.add_row(vec![
        Cell::new("Source"),
        Cell::new(report.source.as_deref().unwrap_or("-")),
    ]);
    let pids = if report.backend_pids.is_empty() {
        "-".to_string()
    } else {
        report
            .backend_pids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    table.add_row(vec![Cell::new("rclone PID"), Cell::new(pids)]);
    table.add_row(vec![Cell::new("Log"), Cell::new(report.log_file.display())]);
    table.add_row(vec![Cell::new("Alias"), Cell::new(report.alias.display())]);
    table.add_row(vec![Cell::new("Alias state"), Cell::new(alias_label(&report.alias_state))]);

    for other in &report.other_scopes {
        table.add_row(vec![
            Cell::new(format!("Also in {}", other.scope)),
            Cell::new(format!("{} ({})", other.mount_point.display(), other.state.label())),
        ]);
    }

    println!("{table}");
}

fn alias_label(state: &AliasState) -> String {
    match state {
        AliasState::Missing => "missing".to_string(),
        AliasState::Symlink {
            target,
            resolves_to_mount: true,
        } => format!("ok -> {}", target.display()),
        AliasState::Symlink {
            target,
            resolves_to_mount: false,
        } => format!("points elsewhere -> {}", target.display()),
        AliasState::NotASymlink => "not a symlink".to_string(),
    }
}
