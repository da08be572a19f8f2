//! Info command - environment, configuration and backend readiness.
//!
//! # Examples
//!
//! ```bash
//! buckets info
//! buckets info --json
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use buckets_mount::{find_executable, fuse_unavailable_reason, MountBackend};

use super::{resolve_root, Session};
use crate::output::{create_table, print_json};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// JSON output format for info command
#[derive(Serialize)]
struct EnvironmentInfo {
    platform: &'static str,
    user: String,
    host: String,
    scope: String,
    config_file: Option<PathBuf>,
    default_root: PathBuf,
    mount_root: PathBuf,
    remote: String,
    rclone: Option<PathBuf>,
    rclone_config: Option<PathBuf>,
    rclone_config_exists: bool,
    fuse: Option<String>,
    /// `None` when the backend is ready
    backend_problem: Option<String>,
    active_mounts: usize,
}

#[instrument(level = "info", name = "cmd::info", skip_all)]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let identity = session.layout.identity();
    let rclone = &session.config.rclone;
    let rclone_config = rclone.resolved_config_file();

    let info = EnvironmentInfo {
        platform: std::env::consts::OS,
        user: identity.user.clone(),
        host: identity.host.clone(),
        scope: identity.scope(),
        config_file: session.config_file.clone(),
        default_root: resolve_root(None)?,
        mount_root: session.layout.scope_root(),
        remote: rclone.remote.clone(),
        rclone: find_executable(&rclone.binary),
        rclone_config_exists: rclone_config.as_ref().is_some_and(|p| p.is_file()),
        rclone_config,
        fuse: fuse_unavailable_reason(),
        backend_problem: MountBackend::unavailable_reason(session.host.backend().as_ref()),
        active_mounts: session
            .reconciler()
            .list()?
            .iter()
            .filter(|e| e.state.is_active())
            .count(),
    };

    if args.json {
        return print_json(&info);
    }

    let mut table = create_table();
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec!["Platform".to_string(), info.platform.to_string()]);
    table.add_row(vec!["User".to_string(), info.user.clone()]);
    table.add_row(vec!["Host".to_string(), info.host.clone()]);
    table.add_row(vec!["Scope".to_string(), info.scope.clone()]);
    table.add_row(vec![
        "Config file".to_string(),
        info.config_file
            .as_ref()
            .map_or_else(|| "(defaults)".to_string(), |p| p.display().to_string()),
    ]);
    table.add_row(vec!["Default root".to_string(), info.default_root.display().to_string()]);
    table.add_row(vec!["Mount root".to_string(), info.mount_root.display().to_string()]);
    table.add_row(vec!["Remote".to_string(), info.remote.clone()]);
    table.add_row(vec![
        "rclone".to_string(),
        info.rclone
            .as_ref()
            .map_or_else(|| "not found in PATH".to_string(), |p| p.display().to_string()),
    ]);
    table.add_row(vec![
        "rclone config".to_string(),
        match &info.rclone_config {
            Some(path) if info.rclone_config_exists => path.display().to_string(),
            Some(path) => format!("missing ({})", path.display()),
            None => "unknown".to_string(),
        },
    ]);
    table.add_row(vec![
        "FUSE".to_string(),
        info.fuse.clone().unwrap_or_else(|| "OK".to_string()),
    ]);
    table.add_row(vec![
        "Backend".to_string(),
        info.backend_problem.clone().unwrap_or_else(|| "ready".to_string()),
    ]);
    table.add_row(vec!["Active mounts".to_string(), info.active_mounts.to_string()]);
    println!("{table}");

    Ok(())
}
