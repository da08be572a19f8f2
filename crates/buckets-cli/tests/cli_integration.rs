#![allow(deprecated)] // cargo_bin! macro doesn't exist yet in assert_cmd 2.1

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Isolated environment: private config dir, base dir and alias root.
struct Env {
    temp: TempDir,
}

impl Env {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir_all(temp.path().join("config")).unwrap();
        std::fs::create_dir_all(temp.path().join("base")).unwrap();
        std::fs::create_dir_all(temp.path().join("work")).unwrap();
        Self { temp }
    }

    fn work(&self) -> std::path::PathBuf {
        self.temp.path().join("work")
    }

    fn write_config(&self, contents: &str) {
        std::fs::write(self.temp.path().join("config/config.toml"), contents).unwrap();
    }

    fn buckets(&self) -> Command {
        let mut cmd = Command::cargo_bin("buckets").unwrap();
        cmd.env("BUCKETS_CONFIG_DIR", self.temp.path().join("config"))
            .env("BUCKETS_BASE_DIR", self.temp.path().join("base"))
            .env_remove("BUCKETS_CONFIG")
            .env_remove("BUCKETS_REMOTE")
            .env_remove("BUCKETS_JOB_ID")
            .env_remove("SLURM_JOB_ID")
            .env_remove("RUST_LOG")
            .current_dir(self.work());
        cmd
    }

    /// Config whose rclone binary cannot exist.
    fn without_rclone(&self) {
        self.write_config("[rclone]\nbinary = \"/nonexistent/bin/rclone\"\n");
    }
}

fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
}

// ============================================================================
// Basic CLI tests
// ============================================================================

#[test]
fn test_help() {
    Env::new()
        .buckets()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mount object storage buckets via rclone"))
        .stdout(predicate::str::contains("mount"))
        .stdout(predicate::str::contains("unmount"))
        .stdout(predicate::str::contains("sweep"));
}

#[test]
fn test_version() {
    Env::new()
        .buckets()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("buckets"));
}

#[test]
fn test_mount_requires_bucket() {
    Env::new()
        .buckets()
        .arg("mount")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_unmount_requires_bucket_or_all() {
    Env::new().buckets().arg("unmount").assert().code(2);
}

#[test]
fn test_completions() {
    Env::new()
        .buckets()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("buckets"));
}

// ============================================================================
// Mount preconditions
// ============================================================================

#[test]
fn test_mount_invalid_bucket() {
    let env = Env::new();
    env.buckets()
        .args(["mount", "s3://"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("Invalid bucket name"));
}

#[test]
fn test_mount_alias_conflict_with_directory() {
    let env = Env::new();
    let data = env.work().join("data");
    std::fs::create_dir_all(data.join("teamspace-lrm")).unwrap();
    std::fs::write(data.join("teamspace-lrm/keep.txt"), b"mine").unwrap();

    env.buckets()
        .args(["mount", "teamspace-lrm", "--root", "./data"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not a symlink"));

    assert_eq!(
        std::fs::read(data.join("teamspace-lrm/keep.txt")).unwrap(),
        b"mine"
    );
}

#[test]
fn test_mount_without_rclone_fails_cleanly() {
    let env = Env::new();
    env.without_rclone();

    env.buckets()
        .args(["mount", "teamspace-lrm", "--root", "data"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("not found"));

    assert!(!is_symlink(&env.work().join("data/teamspace-lrm")));
}

#[test]
fn test_invalid_config_file() {
    let env = Env::new();
    env.write_config("[rclone]\nnot_a_key = true\n");

    env.buckets()
        .arg("mounts")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid config file"));
}

#[test]
fn test_quiet_suppresses_error_message() {
    let env = Env::new();
    env.buckets()
        .args(["-q", "mount", ""])
        .assert()
        .code(6)
        .stderr(predicate::str::is_empty());
}

// ============================================================================
// Unmount and unlink
// ============================================================================

#[test]
fn test_unmount_nothing_succeeds() {
    let env = Env::new();
    env.buckets()
        .args(["unmount", "teamspace-lrm", "--all-scopes"])
        .assert()
        .success()
        .stderr(predicate::str::contains("was not mounted"));
}

#[test]
fn test_unmount_removes_dangling_alias() {
    let env = Env::new();
    let alias = env.work().join("teamspace-lrm");
    std::os::unix::fs::symlink("/nonexistent/mount", &alias).unwrap();

    env.buckets()
        .args(["unmount", "teamspace-lrm"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Removed alias"));

    assert!(!is_symlink(&alias));
}

#[test]
fn test_unmount_keep_alias() {
    let env = Env::new();
    let alias = env.work().join("b");
    std::os::unix::fs::symlink("/nonexistent/mount", &alias).unwrap();

    env.buckets()
        .args(["unmount", "b", "--keep-symlinks"])
        .assert()
        .success();

    assert!(is_symlink(&alias));
}

#[test]
fn test_unmount_never_deletes_directory_alias() {
    let env = Env::new();
    let alias = env.work().join("b");
    std::fs::create_dir(&alias).unwrap();
    std::fs::write(alias.join("data.csv"), b"1,2,3").unwrap();

    env.buckets()
        .args(["unmount", "b"])
        .assert()
        .success()
        .stderr(predicate::str::contains("not a symlink"));

    assert_eq!(std::fs::read(alias.join("data.csv")).unwrap(), b"1,2,3");
}

#[test]
fn test_unmount_all_with_nothing_mounted() {
    let env = Env::new();
    env.buckets()
        .args(["unmount", "--all"])
        .assert()
        .success()
        .stderr(predicate::str::contains("No buckets to unmount"));
}

#[test]
fn test_unlink() {
    let env = Env::new();
    let root = env.work().join("p1");
    std::fs::create_dir(&root).unwrap();
    std::os::unix::fs::symlink("/nonexistent/mount", root.join("b")).unwrap();

    env.buckets()
        .args(["unlink", "b", "--root", "p1"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Removed alias"));
    assert!(!is_symlink(&root.join("b")));

    env.buckets()
        .args(["unlink", "b", "--root", "p1"])
        .assert()
        .success()
        .stderr(predicate::str::contains("No alias"));
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_mounts_empty() {
    let env = Env::new();
    env.buckets()
        .arg("mounts")
        .assert()
        .success()
        .stderr(predicate::str::contains("No buckets mounted"));

    env.buckets()
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("["));
}

#[test]
fn test_status_json() {
    let env = Env::new();
    let output = env
        .buckets()
        .args(["status", "teamspace-lrm", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["bucket"], "teamspace-lrm");
    assert_eq!(status["state"], "missing");
    assert_eq!(status["alias_state"]["kind"], "missing");
    let mount_point = status["mount_point"].as_str().unwrap();
    assert!(mount_point.starts_with(env.temp.path().join("base").to_str().unwrap()));
    assert!(mount_point.ends_with("/shared/teamspace-lrm"));
}

#[test]
fn test_status_uses_job_scope() {
    let env = Env::new();
    env.buckets()
        .env("SLURM_JOB_ID", "81234")
        .args(["status", "b", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"scope\": \"job-81234\""));
}

#[test]
fn test_base_dir_is_not_a_flag() {
    Env::new()
        .buckets()
        .args(["--base-dir", "/elsewhere", "status", "b"])
        .assert()
        .code(2);
}

#[test]
fn test_relative_base_dir_is_resolved() {
    let env = Env::new();
    let output = env
        .buckets()
        .env("BUCKETS_BASE_DIR", "rel-base")
        .args(["status", "b", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let mount_point = Path::new(status["mount_point"].as_str().unwrap());
    let expected_base = env.work().canonicalize().unwrap().join("rel-base");
    assert!(mount_point.is_absolute());
    assert!(
        mount_point.starts_with(&expected_base) || mount_point.starts_with(env.work().join("rel-base")),
        "{}",
        mount_point.display()
    );
}

#[test]
fn test_info_json() {
    let env = Env::new();
    env.without_rclone();
    let output = env.buckets().args(["info", "--json"]).output().unwrap();
    assert!(output.status.success());

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["remote"], "s3_remote");
    assert!(info["rclone"].is_null());
    assert!(info["backend_problem"].as_str().unwrap().contains("not found"));
    assert_eq!(info["active_mounts"], 0);
}

#[test]
fn test_remote_flag_overrides_config() {
    let env = Env::new();
    env.write_config("[rclone]\nremote = \"from_file\"\n");

    env.buckets()
        .args(["--remote", "from_flag", "info", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"remote\": \"from_flag\""));
}

#[test]
fn test_sweep_report() {
    Env::new().buckets().arg("sweep").assert().success();
}
