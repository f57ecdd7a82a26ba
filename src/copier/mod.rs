/*!
 * Copier adapter
 *
 * Convoy never copies bytes itself; it drives an external robocopy-style
 * copier. This module owns everything that touches that program:
 * - argument construction for list-only and copy invocations
 * - streaming parsers for its list and progress output
 * - exit-code classification into chunk outcomes
 *
 * The rest of the crate sees only the `CopierEngine` trait and
 * `ChunkOutcome`; tests substitute an in-memory engine.
 */

mod exit;
mod parse;
mod robocopy;

#[cfg(test)]
pub mod mock;

pub use exit::{classify_exit, OutcomeKind};
pub use parse::{parse_list_line, ListEntry, ProgressParser};
pub use robocopy::RobocopyEngine;

use std::io;
use std::path::PathBuf;

use crate::core::cancel::CancelToken;
use crate::error::Result;

/// One copy invocation, derived from a chunk by the orchestrator
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source: String,
    pub destination: String,
    /// Copy only the files at this level, not descendants
    pub files_only: bool,
    /// Inter-packet gap in milliseconds (0 = unthrottled)
    pub ipg_ms: u64,
    /// Opaque extra flags carried on the chunk
    pub extra_args: Vec<String>,
    /// Per-chunk log file for the raw copier output
    pub log_path: Option<PathBuf>,
}

/// Terminal result of one copier run
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub kind: OutcomeKind,
    pub exit_code: Option<i32>,
    pub bytes_copied: u64,
    pub files_copied: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub last_error: Option<String>,
    pub log_path: Option<PathBuf>,
}

impl ChunkOutcome {
    pub fn cancelled() -> Self {
        Self {
            kind: OutcomeKind::Cancelled,
            exit_code: None,
            bytes_copied: 0,
            files_copied: 0,
            files_skipped: 0,
            files_failed: 0,
            last_error: None,
            log_path: None,
        }
    }
}

/// Streaming line source from a list-only enumeration
pub type ListStream = Box<dyn Iterator<Item = io::Result<String>> + Send>;

/// The external copier, behind a seam so tests can run without a subprocess
pub trait CopierEngine: Send + Sync {
    /// Enumerate `root` in list-only mode, yielding raw output lines as they
    /// stream from the copier.
    fn list(&self, root: &str, cancel: &CancelToken) -> Result<ListStream>;

    /// Replicate one chunk. `progress` receives the running bytes-copied
    /// estimate as output is parsed. Cancellation terminates the subprocess
    /// and yields a `Cancelled` outcome.
    fn run_chunk(
        &self,
        request: &CopyRequest,
        progress: &mut dyn FnMut(u64),
        cancel: &CancelToken,
    ) -> Result<ChunkOutcome>;
}
