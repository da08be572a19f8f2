//! Node identity used to namespace mount points.
//!
//! Mount points are keyed by user, host and scope. The scope is the batch
//! job id when one is visible in the environment, so that a job's mounts
//! die with the job instead of being shared with later jobs on the node.

use std::env;

/// Environment variables consulted for a job id, in priority order.
pub const JOB_ID_VARS: &[&str] = &["BUCKETS_JOB_ID", "SLURM_JOB_ID"];

/// Scope name used when no job id is present.
pub const SHARED_SCOPE: &str = "shared";

/// Who and where we are running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Login name of the current user
    pub user: String,
    /// Numeric uid of the current user
    pub uid: u32,
    /// Short host name (domain stripped)
    pub host: String,
    /// Scheduler job id, if running inside a job
    pub job_id: Option<String>,
}

impl NodeIdentity {
    /// Detect the identity of the current process.
    pub fn detect() -> Self {
        let uid = nix::unistd::getuid();
        let user = nix::unistd::User::from_uid(uid)
            .ok()
            .flatten()
            .map(|u| u.name)
            .or_else(|| env::var("USER").ok())
            .unwrap_or_else(|| format!("uid{}", uid.as_raw()));

        let host = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .map(|h| short_host(&h))
            .unwrap_or_else(|| "localhost".to_string());

        let job_id = JOB_ID_VARS
            .iter()
            .find_map(|var| env::var(var).ok())
            .filter(|v| !v.trim().is_empty());

        Self {
            user,
            uid: uid.as_raw(),
            host,
            job_id,
        }
    }

    /// Scope directory name: `job-<id>` or `shared`.
    pub fn scope(&self) -> String {
        match &self.job_id {
            Some(id) => format!("job-{}", sanitize_component(id)),
            None => SHARED_SCOPE.to_string(),
        }
    }
}

fn short_host(host: &str) -> String {
    let short = host.split('.').next().unwrap_or(host);
    if short.is_empty() {
        "localhost".to_string()
    } else {
        sanitize_component(short)
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` so the value is one path component.
pub(crate) fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
