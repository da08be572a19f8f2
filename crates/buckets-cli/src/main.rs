#![deny(unsafe_code)]

mod commands;
mod config;
mod exit_code;
mod output;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use buckets_mount::MountError;

use crate::commands::{completions, info, mount, mounts, status, sweep, unlink, unmount, Session};
use crate::config::Config;

/// Mount object storage buckets via rclone, shared across jobs on a node
#[derive(Parser)]
#[command(name = "buckets")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Mount a bucket and link it into the current directory
    buckets mount teamspace-lrm

    # Link it somewhere else (the mount itself is shared)
    buckets mount s3://teamspace-lrm --root ./data

    # What is mounted on this node
    buckets mounts

    # Unmount, including mounts left by other jobs
    buckets unmount teamspace-lrm --all-scopes

    # Repair mounts whose rclone process died
    buckets sweep --fix
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file (default: config.toml in the buckets config directory)
    #[arg(long, value_name = "FILE", env = "BUCKETS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// rclone remote name (default: s3_remote)
    #[arg(long, value_name = "NAME", env = "BUCKETS_REMOTE", global = true)]
    remote: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a bucket (reusing an existing mount) and create an alias
    Mount(mount::Args),

    /// Unmount a bucket and remove its alias
    Unmount(unmount::Args),

    /// Remove an alias without unmounting
    Unlink(unlink::Args),

    /// List bucket mounts on this node
    #[command(visible_alias = "list")]
    Mounts(mounts::Args),

    /// Show the state of one bucket
    Status(status::Args),

    /// Find (and with --fix, repair) mounts whose rclone process died
    Sweep(sweep::Args),

    /// Show environment and configuration
    Info(info::Args),

    /// Generate shell completions
    Completions(completions::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let quiet = cli.quiet;

    if !quiet {
        setup_tracing(cli.verbose);
    }

    match run(cli) {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            if !quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        return completions::execute(args, &mut Cli::command());
    }

    let config_file = cli
        .config
        .clone()
        .or_else(config::default_config_path)
        .filter(|p| p.is_file());
    let config = Config::load(cli.config.as_deref())?
        .with_overrides(config::base_dir_from_env(), cli.remote);
    let session = Session::new(config, config_file, cli.quiet);

    match cli.command {
        Commands::Mount(args) => mount::execute(&session, &args),
        Commands::Unmount(args) => unmount::execute(&session, &args),
        Commands::Unlink(args) => unlink::execute(&session, &args),
        Commands::Mounts(args) => mounts::execute(&session, &args),
        Commands::Status(args) => status::execute(&session, &args),
        Commands::Sweep(args) => sweep::execute(&session, &args),
        Commands::Info(args) => info::execute(&session, &args),
        Commands::Completions(_) => Ok(()),
    }
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(mount_err) = cause.downcast_ref::<MountError>() {
            return match mount_err {
                MountError::InvalidBucket { .. } => exit_code::INVALID_BUCKET,
                err if err.is_conflict() => exit_code::ALIAS_CONFLICT,
                MountError::AliasMismatch { .. } => exit_code::ALIAS_CONFLICT,
                MountError::BackendUnavailable(_) | MountError::BucketUnreachable { .. } => {
                    exit_code::BACKEND_UNAVAILABLE
                }
                MountError::StartupFailed { .. }
                | MountError::StartupTimeout { .. }
                | MountError::Spawn(_)
                | MountError::UnmountFailed(_) => exit_code::MOUNT_FAILED,
                MountError::OutsideMountRoot { .. } => exit_code::PERMISSION_DENIED,
                MountError::Io { source, .. } | MountError::Probe { source, .. }
                    if source.kind() == io::ErrorKind::PermissionDenied =>
                {
                    exit_code::PERMISSION_DENIED
                }
                _ => exit_code::GENERAL_ERROR,
            };
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && io_err.kind() == io::ErrorKind::PermissionDenied
        {
            return exit_code::PERMISSION_DENIED;
        }
    }
    exit_code::GENERAL_ERROR
}
