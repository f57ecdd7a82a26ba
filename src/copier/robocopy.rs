/*!
 * Robocopy subprocess engine
 *
 * Launches the external copier with arguments derived from the request,
 * streams its stdout through the progress parser, tees the raw output into
 * the per-chunk log, and classifies the exit code. A monitor thread kills
 * the subprocess when the run-scoped token cancels.
 */

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::{classify_exit, ChunkOutcome, CopierEngine, CopyRequest, ListStream, ProgressParser};
use crate::core::cancel::CancelToken;
use crate::error::{ConvoyError, Result};

/// How often the kill monitor re-checks for cancellation
const MONITOR_POLL: Duration = Duration::from_millis(200);

/// Driver for a robocopy-compatible executable
#[derive(Debug, Clone)]
pub struct RobocopyEngine {
    executable: PathBuf,
}

impl RobocopyEngine {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Arguments for a list-only enumeration of `root`.
    ///
    /// The destination operand is unused under /L but the copier requires
    /// one; the source doubles for it.
    fn list_args(root: &str) -> Vec<String> {
        vec![
            root.to_string(),
            root.to_string(),
            "/L".to_string(),
            "/E".to_string(),
            "/BYTES".to_string(),
            "/NJH".to_string(),
            "/NJS".to_string(),
            "/NP".to_string(),
            "/FP".to_string(),
        ]
    }

    /// Arguments for one chunk copy. The copier's own retry loop is disabled
    /// (/R:0 /W:0); retry scheduling belongs to the orchestrator.
    fn copy_args(request: &CopyRequest) -> Vec<String> {
        let mut args = vec![request.source.clone(), request.destination.clone()];

        if request.files_only {
            args.push("/LEV:1".to_string());
        } else {
            args.push("/E".to_string());
        }

        args.extend(
            ["/BYTES", "/NJH", "/NJS", "/FP", "/R:0", "/W:0"]
                .iter()
                .map(|s| s.to_string()),
        );

        if request.ipg_ms > 0 {
            args.push(format!("/IPG:{}", request.ipg_ms));
        }

        args.extend(request.extra_args.iter().cloned());
        args
    }

    fn spawn(&self, args: &[String]) -> Result<Child> {
        Command::new(&self.executable)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ConvoyError::Copier(format!(
                    "failed to launch {}: {}",
                    self.executable.display(),
                    e
                ))
            })
    }
}

impl CopierEngine for RobocopyEngine {
    fn list(&self, root: &str, _cancel: &CancelToken) -> Result<ListStream> {
        let args = Self::list_args(root);
        debug!(root, "starting list-only enumeration");
        let mut child = self.spawn(&args)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConvoyError::Copier("copier stdout not captured".to_string()))?;
        Ok(Box::new(ChildLines {
            lines: Some(BufReader::new(stdout).lines()),
            child,
        }))
    }

    fn run_chunk(
        &self,
        request: &CopyRequest,
        progress: &mut dyn FnMut(u64),
        cancel: &CancelToken,
    ) -> Result<ChunkOutcome> {
        let args = Self::copy_args(request);
        debug!(
            source = %request.source,
            destination = %request.destination,
            files_only = request.files_only,
            "starting copier"
        );

        let mut child = self.spawn(&args)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConvoyError::Copier("copier stdout not captured".to_string()))?;

        let child = Arc::new(Mutex::new(child));
        let finished = Arc::new(AtomicBool::new(false));
        let monitor = spawn_kill_monitor(child.clone(), finished.clone(), cancel.clone());

        let mut log = match &request.log_path {
            Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(BufWriter::new(file)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "chunk log unavailable");
                    None
                }
            },
            None => None,
        };

        let mut parser = ProgressParser::new();
        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            if let Some(writer) = log.as_mut() {
                let _ = writeln!(writer, "{}", line);
            }
            if let Some(bytes) = parser.feed(&line) {
                progress(bytes);
            }
        }

        finished.store(true, Ordering::Relaxed);
        let status = child.lock().unwrap().wait();
        let _ = monitor.join();
        if let Some(writer) = log.as_mut() {
            let _ = writer.flush();
        }
        parser.finish();

        if cancel.is_cancelled() {
            let mut outcome = ChunkOutcome::cancelled();
            outcome.log_path = request.log_path.clone();
            return Ok(outcome);
        }

        let code = status
            .map_err(|e| ConvoyError::Copier(format!("failed to reap copier: {}", e)))?
            .code()
            .unwrap_or(-1);

        Ok(ChunkOutcome {
            kind: classify_exit(code),
            exit_code: Some(code),
            bytes_copied: parser.bytes_copied(),
            files_copied: parser.files_copied(),
            files_skipped: parser.files_skipped(),
            files_failed: parser.files_failed(),
            last_error: parser.last_error().map(|s| s.to_string()),
            log_path: request.log_path.clone(),
        })
    }
}

fn spawn_kill_monitor(
    child: Arc<Mutex<Child>>,
    finished: Arc<AtomicBool>,
    cancel: CancelToken,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !finished.load(Ordering::Relaxed) {
            if cancel.wait_timeout(MONITOR_POLL) {
                if let Ok(mut child) = child.lock() {
                    let _ = child.kill();
                }
                break;
            }
        }
    })
}

/// Line iterator over a child's stdout that reaps (or kills) the child when
/// it is exhausted or dropped.
struct ChildLines {
    lines: Option<std::io::Lines<BufReader<ChildStdout>>>,
    child: Child,
}

impl Iterator for ChildLines {
    type Item = std::io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.lines.as_mut()?.next();
        if next.is_none() {
            self.lines = None;
            let _ = self.child.wait();
        }
        next
    }
}

impl Drop for ChildLines {
    fn drop(&mut self) {
        if self.lines.is_some() {
            // Stream abandoned mid-read: stop the subprocess before reaping
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
