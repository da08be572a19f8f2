//! Path policy: where mount points, logs and aliases live.
//!
//! ```text
//! <base>/<user>/rclone/<host>/<scope>/<bucket>          mount point
//! <base>/<user>/rclone-logs/<host>/<scope>/<bucket>.log  log sink
//! <root>/<bucket>                                        alias (symlink)
//! ```
//!
//! The mount root is the only place this crate ever deletes anything, and
//! every destructive step goes through [`MountLayout::verify_owned`] first.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::{MountError, MountResult};
use crate::identity::NodeIdentity;

/// Directory under `<base>/<user>` holding mount points.
const MOUNT_DIR: &str = "rclone";

/// Directory under `<base>/<user>` holding backend logs.
const LOG_DIR: &str = "rclone-logs";

/// Default base directory for mount and log roots.
pub const DEFAULT_BASE_DIR: &str = "/tmp";

/// A normalized bucket identifier.
///
/// Scheme prefixes (`s3://`, `remote://`, ...) and surrounding slashes are
/// stripped. The result is guaranteed non-empty and to be a single path
/// component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BucketName(String);

impl BucketName {
    /// Normalize and validate a bucket identifier.
    pub fn parse(raw: &str) -> MountResult<Self> {
        let trimmed = raw.trim();
        let without_scheme = match trimmed.find("://") {
            Some(idx) => &trimmed[idx + 3..],
            None => trimmed,
        };
        let name = without_scheme.trim_matches('/');

        let invalid = |reason| MountError::InvalidBucket {
            name: raw.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(invalid("name must not contain path separators"));
        }
        if name.contains('\0') {
            return Err(invalid("name must not contain NUL"));
        }
        if name == "." || name == ".." {
            return Err(invalid("name must not be a relative path component"));
        }

        Ok(Self(name.to_string()))
    }

    /// The normalized name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BucketName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Computes every path this crate manages for one node identity.
#[derive(Debug, Clone)]
pub struct MountLayout {
    base: PathBuf,
    identity: NodeIdentity,
}

impl MountLayout {
    /// Layout rooted at `base` for the given identity.
    ///
    /// A relative `base` is resolved against the current directory, since
    /// aliases store the mount point as their target.
    pub fn new(base: impl Into<PathBuf>, identity: NodeIdentity) -> Self {
        let base = base.into();
        Self {
            base: std::path::absolute(&base).unwrap_or(base),
            identity,
        }
    }

    /// Layout under the default base for the detected identity.
    pub fn detect() -> Self {
        Self::new(DEFAULT_BASE_DIR, NodeIdentity::detect())
    }

    /// The identity this layout is namespaced by.
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// `<base>/<user>/rclone`: everything below is ours to clean up.
    pub fn user_mount_root(&self) -> PathBuf {
        self.base.join(&self.identity.user).join(MOUNT_DIR)
    }

    /// `<base>/<user>/rclone/<host>`: holds one directory per scope.
    pub fn host_root(&self) -> PathBuf {
        self.user_mount_root().join(&self.identity.host)
    }

    /// `<base>/<user>/rclone/<host>/<scope>` for the current scope.
    pub fn scope_root(&self) -> PathBuf {
        self.host_root().join(self.identity.scope())
    }

    /// Canonical mount point for a bucket in the current scope.
    pub fn mount_point(&self, bucket: &BucketName) -> PathBuf {
        self.scope_root().join(bucket.as_str())
    }

    /// Log sink for a bucket in the current scope, outside the mount root.
    pub fn log_file(&self, bucket: &BucketName) -> PathBuf {
        self.log_file_in_scope(&self.identity.scope(), bucket)
    }

    /// Log sink for a bucket in an arbitrary scope on this host.
    pub fn log_file_in_scope(&self, scope: &str, bucket: &BucketName) -> PathBuf {
        self.base
            .join(&self.identity.user)
            .join(LOG_DIR)
            .join(&self.identity.host)
            .join(scope)
            .join(format!("{bucket}.log"))
    }

    /// Alias path for a bucket under a caller-chosen root.
    pub fn alias_path(&self, root: &Path, bucket: &BucketName) -> PathBuf {
        root.join(bucket.as_str())
    }

    /// Scope directory names that currently exist on this host.
    pub fn scopes(&self) -> MountResult<Vec<String>> {
        let host_root = self.host_root();
        let entries = match std::fs::read_dir(&host_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MountError::io(
                    format!("Failed to read {}", host_root.display()),
                    e,
                ));
            }
        };

        let mut scopes: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        scopes.sort();
        Ok(scopes)
    }

    /// Mount point of a bucket in every existing scope on this host.
    pub fn mount_points_all_scopes(&self, bucket: &BucketName) -> MountResult<Vec<PathBuf>> {
        let host_root = self.host_root();
        Ok(self
            .scopes()?
            .into_iter()
            .map(|scope| host_root.join(scope).join(bucket.as_str()))
            .collect())
    }

    /// Check that `path` lies strictly inside the user mount root.
    ///
    /// Called before clearing stale contents or pruning directories.
    pub fn verify_owned(&self, path: &Path) -> MountResult<()> {
        let root = normalize_mount_path(&self.user_mount_root());
        let candidate = normalize_mount_path(path);

        let has_parent_refs = path.components().any(|c| matches!(c, Component::ParentDir));
        if has_parent_refs || candidate == root || !candidate.starts_with(&root) {
            return Err(MountError::OutsideMountRoot {
                path: path.to_path_buf(),
                root,
            });
        }
        Ok(())
    }

    /// True if `path` is inside the user mount root.
    pub fn owns(&self, path: &Path) -> bool {
        self.verify_owned(path).is_ok()
    }
}

/// Normalize a path for comparison against mount table entries.
///
/// Only the parent directory is canonicalized. The final component is kept
/// as-is so that a symlink alias is never followed and a dead FUSE endpoint
/// is never touched.
pub fn normalize_mount_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => canonicalize_existing_prefix(parent).join(name),
        _ => absolute,
    }
}

/// Canonicalize the longest existing ancestor and re-append the rest.
fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut missing = Vec::new();
    let mut current = path;
    loop {
        if let Ok(canonical) = current.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc, name| acc.join(name));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                current = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}


#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any accepted name is a single, non-empty path component.
        #[test]
        fn parsed_bucket_is_single_component(raw in ".{0,40}") {
            if let Ok(bucket) = BucketName::parse(&raw) {
                let path = Path::new(bucket.as_str());
                prop_assert_eq!(path.components().count(), 1);
                prop_assert!(matches!(path.components().next(), Some(Component::Normal(_))));
            }
        }

        /// Parsing is idempotent on its own output.
        #[test]
        fn parse_is_idempotent(name in "[a-z0-9][a-z0-9.-]{0,30}") {
            let once = BucketName::parse(&format!("s3://{name}")).unwrap();
            let twice = BucketName::parse(once.as_str()).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
