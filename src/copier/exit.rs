/*!
 * Copier exit-code classification
 *
 * The copier's exit code is a bitfield: 1 = files copied, 2 = extra entries
 * at the destination, 4 = mismatched entries, 8 = copy failures, 16 = fatal
 * error. Severity wins: any failure bit makes the run a failure regardless
 * of what else was accomplished.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

pub const EXIT_COPIED: i32 = 1;
pub const EXIT_EXTRAS: i32 = 2;
pub const EXIT_MISMATCH: i32 = 4;
pub const EXIT_FAILED: i32 = 8;
pub const EXIT_FATAL: i32 = 16;

/// Classified result of one copier run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// Files were copied and nothing went wrong
    Success,
    /// Nothing needed copying (everything current or only extras noted)
    SuccessWithSkipped,
    /// Mismatched files or directories were detected
    Warning,
    /// Copy failures or a fatal copier error
    Failure,
    /// The run was terminated by a stop request
    Cancelled,
}

impl OutcomeKind {
    /// Whether this outcome counts as "done" for progress purposes
    pub fn is_terminal_success(&self) -> bool {
        matches!(
            self,
            OutcomeKind::Success | OutcomeKind::SuccessWithSkipped | OutcomeKind::Warning
        )
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Success => write!(f, "success"),
            OutcomeKind::SuccessWithSkipped => write!(f, "success-with-skipped"),
            OutcomeKind::Warning => write!(f, "warning"),
            OutcomeKind::Failure => write!(f, "failure"),
            OutcomeKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Classify a copier exit code
pub fn classify_exit(code: i32) -> OutcomeKind {
    if code < 0 || code & EXIT_FATAL != 0 || code & EXIT_FAILED != 0 {
        return OutcomeKind::Failure;
    }
    if code & EXIT_MISMATCH != 0 {
        return OutcomeKind::Warning;
    }
    if code & EXIT_COPIED != 0 {
        return OutcomeKind::Success;
    }
    // 0 (all current) or bare extras
    OutcomeKind::SuccessWithSkipped
}
