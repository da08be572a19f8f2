//! Unlink command - remove one alias, leave the mount for other users.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use buckets_mount::AliasRemoval;

use super::{parse_bucket, resolve_root, Session};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Bucket whose alias to remove
    pub bucket: String,

    /// Directory holding the alias (default: current directory)
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

#[instrument(level = "info", name = "cmd::unlink", skip_all, fields(bucket = %args.bucket))]
pub fn execute(session: &Session, args: &Args) -> Result<()> {
    let bucket = parse_bucket(&args.bucket)?;
    let root = resolve_root(args.root.as_deref())?;

    let (alias, removal) = session.reconciler().unlink(&bucket, &root)?;
    match removal {
        AliasRemoval::Removed => session.note(format_args!("Removed alias {}", alias.display())),
        AliasRemoval::Missing => session.note(format_args!("No alias at {}", alias.display())),
        AliasRemoval::NotASymlink => eprintln!(
            "Warning: {} is not a symlink, left untouched",
            alias.display()
        ),
    }
    Ok(())
}
