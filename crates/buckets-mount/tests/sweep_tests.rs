//! Zombie sweep against synthetic mount and process tables.

use std::path::Path;

use buckets_mount::testing::{assert_mount_count, TestNode};
use buckets_mount::{BucketName, FixAction, MountHealth, MountTable, SweepMode};

/// Plant a mount table entry for `test-bucket` with no backend process.
fn plant_orphan(node: &TestNode) -> std::path::PathBuf {
    let mp = node.layout.mount_point(&BucketName::parse("test-bucket").unwrap());
    std::fs::create_dir_all(&mp).unwrap();
    node.table
        .insert_fuse("remote:test-bucket", &mp, node.layout.identity().uid);
    mp
}

fn snapshot(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut seen = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            seen.push(path);
        }
    }
    seen.sort();
    seen
}

#[test]
fn test_report_mode_classifies_orphan_without_changes() {
    let node = TestNode::new();
    let mp = plant_orphan(&node);
    let before_fs = snapshot(node.path());
    let before_table = node.table.entries().unwrap();

    let report = node.sweep().run(SweepMode::Report).unwrap();

    assert_eq!(report.entries.len(), 1);
    let entry = &report.entries[0];
    assert_eq!(entry.source, "remote:test-bucket");
    assert_eq!(entry.bucket.as_deref(), Some("test-bucket"));
    assert_eq!(entry.mount_point, mp);
    assert_eq!(entry.status, MountHealth::Orphan);
    assert!(entry.action.is_none());

    assert_eq!(snapshot(node.path()), before_fs);
    assert_eq!(node.table.entries().unwrap(), before_table);
    assert_eq!(node.backend.unmount_calls(), 0);
}

#[test]
fn test_fix_mode_removes_orphan_entry() {
    let node = TestNode::new();
    let mp = plant_orphan(&node);

    let report = node.sweep().run(SweepMode::Fix).unwrap();

    assert_eq!(report.orphans(), 1);
    assert_eq!(report.repaired(), 1);
    assert_eq!(report.failed(), 0);
    assert_mount_count(node.table.as_ref(), "remote:test-bucket", 0);
    assert!(!mp.exists());
    assert!(node.layout.user_mount_root().is_dir());
}

#[test]
fn test_fix_mode_terminates_straggler_for_other_mount_point() {
    let node = TestNode::new();
    let mp = plant_orphan(&node);
    // A process that names this mount point but a different bucket.
    let pid = node.processes.add(vec![
        "rclone".into(),
        "mount".into(),
        "remote:renamed".into(),
        mp.display().to_string(),
    ]);

    let report = node.sweep().run(SweepMode::Fix).unwrap();

    assert_eq!(report.entries[0].status, MountHealth::Orphan);
    match &report.entries[0].action {
        Some(FixAction::Repaired { terminated, .. }) => assert_eq!(*terminated, 1),
        other => panic!("unexpected action: {other:?}"),
    }
    assert!(!node.processes.contains(pid));
}

#[test]
fn test_healthy_mount_left_alone_in_fix_mode() {
    let node = TestNode::new();
    let b = BucketName::parse("test-bucket").unwrap();
    let outcome = node.reconciler().mount(&b, &node.alias_root("data")).unwrap();
    plant_orphan_elsewhere(&node);

    let report = node.sweep().run(SweepMode::Fix).unwrap();

    assert_eq!(report.healthy(), 1);
    assert_eq!(report.orphans(), 1);
    assert!(node.probe().is_active_mount(&outcome.mount_point).unwrap());
    assert_mount_count(node.table.as_ref(), "remote:test-bucket", 1);
    assert_mount_count(node.table.as_ref(), "remote:gone", 0);
}

fn plant_orphan_elsewhere(node: &TestNode) {
    let job = node.in_scope(Some("99"));
    let mp = job.layout.mount_point(&BucketName::parse("gone").unwrap());
    std::fs::create_dir_all(&mp).unwrap();
    node.table.insert_fuse("remote:gone", &mp, node.layout.identity().uid);
}

#[test]
fn test_same_bucket_in_two_scopes_is_not_confused() {
    let shared = TestNode::new();
    let job = shared.in_scope(Some("12"));
    let b = BucketName::parse("test-bucket").unwrap();
    shared.reconciler().mount(&b, &shared.alias_root("s")).unwrap();

    // The job's mount has no process; the shared one does.
    let job_mp = job.layout.mount_point(&b);
    std::fs::create_dir_all(&job_mp).unwrap();
    shared
        .table
        .insert_fuse("remote:test-bucket", &job_mp, shared.layout.identity().uid);

    let entries = shared.sweep().scan().unwrap();
    let by_path = |p: &Path| entries.iter().find(|e| e.mount_point == p).unwrap().status;
    assert_eq!(by_path(&shared.layout.mount_point(&b)), MountHealth::Healthy);
    assert_eq!(by_path(&job_mp), MountHealth::Orphan);
}

#[test]
fn test_fix_is_repeatable() {
    let node = TestNode::new();
    plant_orphan(&node);

    node.sweep().run(SweepMode::Fix).unwrap();
    let second = node.sweep().run(SweepMode::Fix).unwrap();

    assert!(second.entries.is_empty());
}

#[test]
fn test_unreadable_mount_table_is_an_error() {
    let node = TestNode::new();
    node.table.fail_reads(true);

    assert!(node.sweep().run(SweepMode::Report).is_err());
}
