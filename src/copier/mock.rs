//! In-memory copier engine for unit tests
//!
//! Listings and per-source outcomes are scripted up front; requests are
//! recorded so tests can assert on what the orchestrator actually ran.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ChunkOutcome, CopierEngine, CopyRequest, ListStream, OutcomeKind};
use crate::core::cancel::CancelToken;
use crate::core::paths;
use crate::error::{ConvoyError, Result};

#[derive(Default)]
pub struct MockEngine {
    listings: HashMap<String, Vec<String>>,
    scripted: Mutex<HashMap<String, VecDeque<ChunkOutcome>>>,
    runs: Mutex<Vec<CopyRequest>>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    /// Simulated per-chunk runtime, checked against the cancel token
    pub run_delay: Option<Duration>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the raw list-only output for a root
    pub fn with_listing(mut self, root: &str, lines: &[&str]) -> Self {
        self.listings.insert(
            paths::normalize(root).to_lowercase(),
            lines.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Queue an outcome for the next run against `source`; later runs pop in
    /// order and fall back to a plain success.
    pub fn script_outcome(&self, source: &str, outcome: ChunkOutcome) {
        self.scripted
            .lock()
            .unwrap()
            .entry(paths::normalize(source).to_lowercase())
            .or_default()
            .push_back(outcome);
    }

    pub fn runs(&self) -> Vec<CopyRequest> {
        self.runs.lock().unwrap().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    /// Highest number of chunk runs observed in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    pub fn outcome(kind: OutcomeKind, bytes: u64, files: u64) -> ChunkOutcome {
        ChunkOutcome {
            kind,
            exit_code: Some(match kind {
                OutcomeKind::Success => 1,
                OutcomeKind::SuccessWithSkipped => 0,
                OutcomeKind::Warning => 4,
                OutcomeKind::Failure => 8,
                OutcomeKind::Cancelled => -1,
            }),
            bytes_copied: bytes,
            files_copied: files,
            files_skipped: 0,
            files_failed: 0,
            last_error: None,
            log_path: None,
        }
    }
}

impl CopierEngine for MockEngine {
    fn list(&self, root: &str, _cancel: &CancelToken) -> Result<ListStream> {
        let key = paths::normalize(root).to_lowercase();
        let lines = self
            .listings
            .get(&key)
            .cloned()
            .ok_or_else(|| ConvoyError::Copier(format!("no listing scripted for {}", root)))?;
        Ok(Box::new(lines.into_iter().map(Ok)))
    }

    fn run_chunk(
        &self,
        request: &CopyRequest,
        progress: &mut dyn FnMut(u64),
        cancel: &CancelToken,
    ) -> Result<ChunkOutcome> {
        self.runs.lock().unwrap().push(request.clone());

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now_active, Ordering::SeqCst);
        let result = self.run_scripted(request, progress, cancel);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl MockEngine {
    fn run_scripted(
        &self,
        request: &CopyRequest,
        progress: &mut dyn FnMut(u64),
        cancel: &CancelToken,
    ) -> Result<ChunkOutcome> {
        if let Some(delay) = self.run_delay {
            if cancel.wait_timeout(delay) {
                return Ok(ChunkOutcome::cancelled());
            }
        } else if cancel.is_cancelled() {
            return Ok(ChunkOutcome::cancelled());
        }

        let key = paths::normalize(&request.source).to_lowercase();
        let outcome = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Self::outcome(OutcomeKind::Success, 0, 0));

        if outcome.bytes_copied > 0 {
            progress(outcome.bytes_copied);
        }
        Ok(outcome)
    }
}
