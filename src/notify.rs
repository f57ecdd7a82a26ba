/*!
 * Completion notification seam
 *
 * The core never formats or sends messages itself; it hands the finished
 * summary to whatever notifier was injected. The default implementation
 * just logs, which keeps headless runs dependency-free.
 */

use std::path::PathBuf;

use tracing::info;

use crate::error::Result;
use crate::stats::{RunStatus, RunSummary};

/// Severity the notifier should convey
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyStatus {
    Success,
    Warning,
    Failed,
}

impl From<RunStatus> for NotifyStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => NotifyStatus::Success,
            RunStatus::Warning => NotifyStatus::Warning,
            RunStatus::Failed | RunStatus::Stopped => NotifyStatus::Failed,
        }
    }
}

impl std::fmt::Display for NotifyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NotifyStatus::Success => "success",
            NotifyStatus::Warning => "warning",
            NotifyStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Delivery channel for terminal run events
pub trait Notifier: Send + Sync {
    fn notify_completion(
        &self,
        summary: &RunSummary,
        status: NotifyStatus,
        attachments: &[PathBuf],
    ) -> Result<()>;
}

/// Default notifier: one structured log line, never fails
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_completion(
        &self,
        summary: &RunSummary,
        status: NotifyStatus,
        attachments: &[PathBuf],
    ) -> Result<()> {
        info!(
            session = %summary.session_id,
            status = %status,
            profiles = summary.results.len(),
            bytes = summary.total_bytes(),
            failed_chunks = summary.total_failed_chunks(),
            attachments = attachments.len(),
            "run complete"
        );
        Ok(())
    }
}
