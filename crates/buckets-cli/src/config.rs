//! Configuration file support.
//!
//! Loads `config.toml` from the buckets config directory:
//! - `$BUCKETS_CONFIG_DIR/config.toml` when set
//! - Linux: `~/.config/buckets/config.toml`
//! - macOS: `~/Library/Application Support/org.buckets.buckets/config.toml`
//!
//! # Format
//!
//! ```toml
//! base_dir = "/scratch"
//!
//! [engine]
//! readiness_timeout = "45s"
//! poll_interval = "250ms"
//!
//! [rclone]
//! remote = "s3_remote"
//! vfs_cache_mode = "writes"
//! extra_args = ["--s3-no-check-bucket"]
//! ```
//!
//! Command-line flags override environment variables, which override the
//! file, which overrides built-in defaults.
//!
//! The base directory is node-wide: it comes from the file or
//! `BUCKETS_BASE_DIR`, never from a per-invocation flag, so every caller on
//! a node computes the same mount point for a bucket.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use buckets_mount::{EngineConfig, RcloneOptions, DEFAULT_BASE_DIR};

/// Environment variable that relocates the config directory.
pub const CONFIG_DIR_ENV: &str = "BUCKETS_CONFIG_DIR";

/// Environment variable overriding the node-wide base directory.
pub const BASE_DIR_ENV: &str = "BUCKETS_BASE_DIR";

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Node-wide base directory for mount points and logs
    pub base_dir: Option<PathBuf>,
    pub engine: EngineConfig,
    pub rclone: RcloneOptions,
}

impl Config {
    /// Load the config file.
    ///
    /// An explicit `path` must exist; the default location may be absent,
    /// in which case defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                Some(path) => {
                    tracing::debug!("No config file at {}, using defaults", path.display());
                    Ok(Self::default())
                }
                None => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply environment and command-line overrides.
    pub fn with_overrides(mut self, base_dir: Option<PathBuf>, remote: Option<String>) -> Self {
        if let Some(base_dir) = base_dir {
            self.base_dir = Some(base_dir);
        }
        if let Some(remote) = remote {
            self.rclone.remote = remote;
        }
        self
    }

    /// Base directory in effect.
    pub fn base_dir(&self) -> PathBuf {
        self.base_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR))
    }
}

/// Base directory set in the environment, if any.
pub fn base_dir_from_env() -> Option<PathBuf> {
    std::env::var_os(BASE_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// `config.toml` in the config directory, if one can be determined.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}

fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("org", "buckets", "buckets")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            base_dir = "/scratch"

            [engine]
            readiness_timeout = "45s"
            poll_interval = "100ms"

            [rclone]
            remote = "lab"
            vfs_cache_mode = "full"
            extra_args = ["--s3-no-check-bucket"]
            "#,
        )
        .unwrap();

        assert_eq!(config.base_dir(), PathBuf::from("/scratch"));
        assert_eq!(config.engine.readiness_timeout, Duration::from_secs(45));
        assert_eq!(config.engine.poll_interval, Duration::from_millis(100));
        assert_eq!(config.engine.terminate_grace, EngineConfig::default().terminate_grace);
        assert_eq!(config.rclone.remote, "lab");
        assert_eq!(config.rclone.vfs_cache_mode, "full");
        assert_eq!(config.rclone.extra_args, vec!["--s3-no-check-bucket".to_string()]);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::parse("mount_root = \"/x\"").is_err());
        assert!(Config::parse("[rclone]\nremtoe = \"typo\"").is_err());
    }

    #[test]
    fn test_overrides_win() {
        let config = Config::parse("base_dir = \"/from-file\"\n[rclone]\nremote = \"file\"")
            .unwrap()
            .with_overrides(Some(PathBuf::from("/from-env")), Some("flag".into()));
        assert_eq!(config.base_dir(), PathBuf::from("/from-env"));
        assert_eq!(config.rclone.remote, "flag");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_default_base_dir() {
        assert_eq!(Config::default().base_dir(), PathBuf::from(DEFAULT_BASE_DIR));
    }
}
