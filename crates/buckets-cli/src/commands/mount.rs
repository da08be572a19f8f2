//! Mount command - make a bucket available under an alias root.
//!
//! # Examples
//!
//! ```bash
//! # Link into the current directory
//! buckets mount teamspace-lrm
//!
//! # Scheme prefixes are accepted
//! buckets mount s3://teamspace-lrm --root ./data
//! ```
//!
//! The mount itself lives under the node's mount root and is shared by every
//! alias of the same bucket in the same scope. The alias path is printed on
//! stdout so scripts can capture it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use buckets_mount::AliasOutcome;

use super::{parse_bucket, resolve_root, Session};
use crate::output::print_json;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Bucket name (with or without s3:// prefix)
    pub bucket: String,

    /// Directory for the alias symlink (default: current directory)
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::mount", skip_all, fields(bucket = %args.bucket))]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let bucket = parse_bucket(&args.bucket)?;
    let root = resolve_root(args.root.as_deref())?;

    if !root.is_dir() {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create alias root {}", root.display()))?;
    }

    let outcome = session
        .reconciler()
        .mount(&bucket, &root)
        .with_context(|| format!("Failed to mount {bucket}"))?;

    if args.json {
        return print_json(&outcome);
    }

    if outcome.reused {
        session.note(format_args!(
            "Reusing existing mount of {bucket} at {}",
            outcome.mount_point.display()
        ));
    } else {
        session.note(format_args!(
            "Mounted {bucket} at {} (log: {})",
            outcome.mount_point.display(),
            outcome.log_file.display()
        ));
    }
    if let AliasOutcome::Retargeted { previous } = &outcome.alias_change {
        session.note(format_args!(
            "Alias previously pointed to {}",
            previous.display()
        ));
    }

    println!("{}", outcome.alias.display());
    Ok(())
}
