/*!
 * Run summary statistics
 */

use chrono::{DateTime, Utc};

use crate::core::orchestrator::{ProfileResult, ProfileStatus};

/// Terminal status of a whole session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Warning,
    Failed,
    Stopped,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Success => "success",
            RunStatus::Warning => "warning",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Everything one session accomplished
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub session_id: String,
    pub results: Vec<ProfileResult>,
    /// Profiles that never started because pre-flight rejected them
    pub preflight_failures: u64,
    /// Set when notification was requested but could not be delivered
    pub notify_failed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn new(session_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            results: Vec::new(),
            preflight_failures: 0,
            notify_failed: false,
            started_at,
            finished_at: started_at,
        }
    }

    /// Worst outcome across profiles; pre-flight rejections count as failure
    pub fn status(&self) -> RunStatus {
        if self.results.iter().any(|r| r.status == ProfileStatus::Stopped) {
            return RunStatus::Stopped;
        }
        if self.preflight_failures > 0
            || self.results.iter().any(|r| r.status == ProfileStatus::Failed)
        {
            return RunStatus::Failed;
        }
        if self.results.iter().any(|r| r.status == ProfileStatus::Warning) {
            return RunStatus::Warning;
        }
        RunStatus::Success
    }

    pub fn total_bytes(&self) -> u64 {
        self.results.iter().map(|r| r.bytes_copied).sum()
    }

    pub fn total_files(&self) -> u64 {
        self.results.iter().map(|r| r.files_copied).sum()
    }

    pub fn total_chunks(&self) -> u64 {
        self.results.iter().map(|r| r.total_chunks).sum()
    }

    pub fn total_failed_chunks(&self) -> u64 {
        self.results.iter().map(|r| r.failed).sum()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Mean throughput across the session in bytes per second
    pub fn throughput_bps(&self) -> f64 {
        let ms = self.duration_ms();
        if ms == 0 {
            return 0.0;
        }
        self.total_bytes() as f64 * 1_000.0 / ms as f64
    }

    /// Process exit code: 0 success, 1 replication failure or stopped,
    /// 2 pre-flight failure, 3 notification failure
    pub fn exit_code(&self) -> i32 {
        if self.notify_failed {
            return 3;
        }
        if self.preflight_failures > 0 {
            return 2;
        }
        match self.status() {
            RunStatus::Success | RunStatus::Warning => 0,
            RunStatus::Failed | RunStatus::Stopped => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: ProfileStatus) -> ProfileResult {
        let now = Utc::now();
        ProfileResult {
            name: name.to_string(),
            status,
            total_chunks: 10,
            completed: 8,
            warnings: 1,
            failed: 1,
            resumed: 0,
            bytes_copied: 1_000,
            files_copied: 50,
            files_skipped: 2,
            files_failed: 3,
            started_at: now,
            finished_at: now + chrono::Duration::seconds(10),
        }
    }

    #[test]
    fn test_status_is_worst_of_profiles() {
        let mut summary = RunSummary::new("sess", Utc::now());
        summary.results.push(result("a", ProfileStatus::Success));
        assert_eq!(summary.status(), RunStatus::Success);

        summary.results.push(result("b", ProfileStatus::Warning));
        assert_eq!(summary.status(), RunStatus::Warning);

        summary.results.push(result("c", ProfileStatus::Failed));
        assert_eq!(summary.status(), RunStatus::Failed);

        summary.results.push(result("d", ProfileStatus::Stopped));
        assert_eq!(summary.status(), RunStatus::Stopped);
    }

    #[test]
    fn test_preflight_failure_fails_run() {
        let mut summary = RunSummary::new("sess", Utc::now());
        summary.results.push(result("a", ProfileStatus::Success));
        summary.preflight_failures = 1;
        assert_eq!(summary.status(), RunStatus::Failed);
        assert_eq!(summary.exit_code(), 2);
    }

    #[test]
    fn test_exit_codes() {
        let mut summary = RunSummary::new("sess", Utc::now());
        summary.results.push(result("a", ProfileStatus::Success));
        assert_eq!(summary.exit_code(), 0);

        summary.results.push(result("b", ProfileStatus::Failed));
        assert_eq!(summary.exit_code(), 1);

        summary.notify_failed = true;
        assert_eq!(summary.exit_code(), 3);
    }

    #[test]
    fn test_aggregates() {
        let mut summary = RunSummary::new("sess", Utc::now());
        summary.results.push(result("a", ProfileStatus::Success));
        summary.results.push(result("b", ProfileStatus::Success));
        assert_eq!(summary.total_bytes(), 2_000);
        assert_eq!(summary.total_files(), 100);
        assert_eq!(summary.total_chunks(), 20);
        assert_eq!(summary.total_failed_chunks(), 2);
    }
}
