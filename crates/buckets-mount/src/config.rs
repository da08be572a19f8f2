//! Tuning knobs for the reconciliation engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound on waiting for a new mount to appear (30 seconds).
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between readiness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default time a backend gets to exit after SIGTERM before SIGKILL.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Default number of log lines surfaced with a startup failure.
pub const DEFAULT_LOG_TAIL_LINES: usize = 20;

/// Timing and diagnostics configuration shared by mount, unmount and sweep.
///
/// Deserializes from the `[engine]` table of the config file; durations use
/// humantime notation (`"30s"`, `"250ms"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound on the readiness poll after starting a backend.
    #[serde(with = "humantime_serde")]
    pub readiness_timeout: Duration,

    /// Interval between mount-table checks during the readiness poll.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// SIGTERM to SIGKILL grace period when stopping a backend.
    #[serde(with = "humantime_serde")]
    pub terminate_grace: Duration,

    /// Log lines included in startup failure diagnostics.
    pub log_tail_lines: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
        }
    }
}

impl EngineConfig {
    /// Sets the readiness timeout.
    #[must_use]
    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Sets the readiness poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the SIGTERM grace period.
    #[must_use]
    pub fn terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    /// Sets how many log lines accompany a startup failure.
    #[must_use]
    pub fn log_tail_lines(mut self, lines: usize) -> Self {
        self.log_tail_lines = lines;
        self
    }
}
