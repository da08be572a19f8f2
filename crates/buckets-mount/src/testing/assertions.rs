//! Assertions for alias and mount-table state.

use std::path::Path;

use crate::mount_markers::MountTable;

/// Assert that `alias` is a symlink that canonicalizes to `mount_point`.
pub fn assert_alias_resolves_to(alias: &Path, mount_point: &Path) {
    let meta = std::fs::symlink_metadata(alias)
        .unwrap_or_else(|e| panic!("{}: alias missing: {e}", alias.display()));
    assert!(
        meta.file_type().is_symlink(),
        "{}: expected a symlink, found {:?}",
        alias.display(),
        meta.file_type()
    );

    let resolved = std::fs::canonicalize(alias)
        .unwrap_or_else(|e| panic!("{}: alias does not resolve: {e}", alias.display()));
    let expected = std::fs::canonicalize(mount_point)
        .unwrap_or_else(|e| panic!("{}: mount point does not resolve: {e}", mount_point.display()));
    assert_eq!(
        resolved,
        expected,
        "{}: alias resolves to the wrong place",
        alias.display()
    );
}

/// Assert that nothing exists at `alias`.
pub fn assert_no_alias(alias: &Path) {
    if let Ok(meta) = std::fs::symlink_metadata(alias) {
        panic!(
            "{}: expected no alias, found {:?}",
            alias.display(),
            meta.file_type()
        );
    }
}

/// Assert how many table entries have source `fsname`.
pub fn assert_mount_count(table: &dyn MountTable, fsname: &str, expected: usize) {
    let entries = table.entries().expect("mount table unreadable");
    let matching: Vec<_> = entries.iter().filter(|m| m.fsname == fsname).collect();
    assert_eq!(
        matching.len(),
        expected,
        "mount table entries for {fsname}: {matching:#?}"
    );
}
