pub mod completions;
pub mod info;
pub mod mount;
pub mod mounts;
pub mod status;
pub mod sweep;
pub mod unlink;
pub mod unmount;

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use buckets_mount::{
    BucketName, Host, MountLayout, NodeIdentity, RcloneBackend, Reconciler, ZombieSweep,
};

use crate::config::Config;

/// Everything a command needs: resolved config, node layout and host.
pub struct Session {
    pub config: Config,
    /// Config file that was loaded, if any
    pub config_file: Option<PathBuf>,
    pub layout: MountLayout,
    pub host: Host,
    quiet: bool,
}

impl Session {
    pub fn new(config: Config, config_file: Option<PathBuf>, quiet: bool) -> Self {
        let layout = MountLayout::new(config.base_dir(), NodeIdentity::detect());
        let backend = Arc::new(RcloneBackend::new(config.rclone.clone()));
        let host = Host::system(backend);
        Self {
            config,
            config_file,
            layout,
            host,
            quiet,
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.layout.clone(), self.host.clone(), self.config.engine.clone())
    }

    pub fn sweep(&self) -> ZombieSweep {
        ZombieSweep::new(self.layout.clone(), self.host.clone(), self.config.engine.clone())
    }

    /// Progress message on stderr, unless `--quiet`.
    pub fn note(&self, message: impl Display) {
        if !self.quiet {
            eprintln!("{message}");
        }
    }
}

/// Parse a bucket argument, accepting `s3://` style prefixes.
pub fn parse_bucket(raw: &str) -> Result<BucketName> {
    Ok(BucketName::parse(raw)?)
}

/// Alias root as an absolute path; the current directory when not given.
pub fn resolve_root(root: Option<&Path>) -> Result<PathBuf> {
    let root = root.unwrap_or(Path::new("."));
    std::path::absolute(root)
        .with_context(|| format!("Cannot resolve alias root {}", root.display()))
}
