//! Mounts command - list bucket mount points on this node.

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::Cell;
use tracing::instrument;

use buckets_mount::MountEntry;

use super::Session;
use crate::output::{create_table, print_json, state_cell};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Only the current scope (job)
    #[arg(long)]
    pub current: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::mounts", skip_all)]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let mut entries = session.reconciler().list()?;
    if args.current {
        entries.retain(|e| e.current_scope);
    }

    if args.json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        session.note("No buckets mounted");
        return Ok(());
    }

    output_table(&entries);

    let active = entries.iter().filter(|e| e.state.is_active()).count();
    session.note(format_args!(
        "\n{active} active mount(s) under {}",
        session.layout.host_root().display()
    ));
    Ok(())
}

fn output_table(entries: &[MountEntry]) {
    let mut table = create_table();
    table.set_header(vec!["Bucket", "Scope", "State", "Mount Point"]);

    for entry in entries {
        let scope = if entry.current_scope {
            format!("{} (this job)", entry.scope)
        } else {
            entry.scope.clone()
        };
        table.add_row(vec![
            Cell::new(&entry.bucket),
            Cell::new(scope),
            state_cell(entry.state),
            Cell::new(entry.mount_point.display()),
        ]);
    }

    println!("{table}");
}
