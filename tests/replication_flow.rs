/*!
 * End-to-end replication scenarios against an in-memory copier engine
 */

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::tempdir;

use convoy::config::{AppConfig, ChunkLimits, Profile, ScanMode};
use convoy::copier::{ChunkOutcome, CopierEngine, CopyRequest, ListStream, OutcomeKind};
use convoy::core::cancel::CancelToken;
use convoy::error::{ConvoyError, Result};
use convoy::notify::LogNotifier;
use convoy::snapshot::{ShadowInfo, SnapshotDriver};
use convoy::stats::RunStatus;
use convoy::system::SystemClock;
use convoy::Session;

/// Scripted engine: fixed listings, per-source failure budgets, a run log
struct ScriptedEngine {
    listings: HashMap<String, Vec<String>>,
    /// Remaining failures per normalized source prefix
    failures: Mutex<HashMap<String, u32>>,
    runs: Mutex<Vec<CopyRequest>>,
    /// Simulated copy duration, interruptible by cancellation
    delay: Option<std::time::Duration>,
}

impl ScriptedEngine {
    fn new() -> Self {
        Self {
            listings: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            runs: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn with_listing(mut self, root: &str, lines: &[&str]) -> Self {
        self.listings.insert(
            normalize_key(root),
            lines.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    fn fail_next(&self, source: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(normalize_key(source), times);
    }

    fn runs(&self) -> Vec<CopyRequest> {
        self.runs.lock().unwrap().clone()
    }
}

fn normalize_key(path: &str) -> String {
    path.trim_end_matches(['/', '\\'])
        .replace('/', "\\")
        .to_lowercase()
}

impl CopierEngine for ScriptedEngine {
    fn list(&self, root: &str, _cancel: &CancelToken) -> Result<ListStream> {
        let lines = self
            .listings
            .get(&normalize_key(root))
            .cloned()
            .ok_or_else(|| ConvoyError::Copier(format!("no listing for {}", root)))?;
        Ok(Box::new(lines.into_iter().map(Ok)))
    }

    fn run_chunk(
        &self,
        request: &CopyRequest,
        progress: &mut dyn FnMut(u64),
        cancel: &CancelToken,
    ) -> Result<ChunkOutcome> {
        self.runs.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            if cancel.wait_timeout(delay) {
                return Ok(ChunkOutcome::cancelled());
            }
        } else if cancel.is_cancelled() {
            return Ok(ChunkOutcome::cancelled());
        }

        let key = normalize_key(&request.source);
        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(ChunkOutcome {
                    kind: OutcomeKind::Failure,
                    exit_code: Some(8),
                    bytes_copied: 0,
                    files_copied: 0,
                    files_skipped: 0,
                    files_failed: 1,
                    last_error: Some("scripted copy failure".to_string()),
                    log_path: request.log_path.clone(),
                });
            }
        }

        progress(4096);
        Ok(ChunkOutcome {
            kind: OutcomeKind::Success,
            exit_code: Some(1),
            bytes_copied: 4096,
            files_copied: 1,
            files_skipped: 0,
            files_failed: 0,
            last_error: None,
            log_path: request.log_path.clone(),
        })
    }
}

/// Driver stub for sessions that never snapshot
struct NoSnapshots;

impl SnapshotDriver for NoSnapshots {
    fn create_shadow(&self, _volume: &str, _server: Option<&str>) -> Result<ShadowInfo> {
        Err(ConvoyError::Snapshot {
            message: "snapshots not available in this test".to_string(),
            retryable: false,
        })
    }

    fn delete_shadow(&self, _shadow_id: &str, _server: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn list_shadows(&self, _server: Option<&str>) -> Result<Vec<ShadowInfo>> {
        Ok(vec![])
    }

    fn resolve_share(&self, _server: &str, _share: &str) -> Result<String> {
        Err(ConvoyError::Snapshot {
            message: "no shares".to_string(),
            retryable: false,
        })
    }

    fn create_junction(&self, _junction_path: &str, _target: &str) -> Result<()> {
        Ok(())
    }

    fn remove_junction(&self, _junction_path: &str) -> Result<()> {
        Ok(())
    }
}

fn profile(name: &str, source: &str, destination: &str, limits: ChunkLimits) -> Profile {
    Profile {
        name: name.to_string(),
        source: source.to_string(),
        destination: destination.to_string(),
        enabled: true,
        use_snapshot: false,
        scan_mode: ScanMode::Smart,
        limits,
        copier_args: vec![],
    }
}

fn session(dir: &tempfile::TempDir, engine: Arc<ScriptedEngine>, profiles: Vec<Profile>) -> Session {
    let mut config = AppConfig::default();
    config.data_dir = Some(dir.path().join("data"));
    config.orchestrator.tick_interval_ms = 5;
    config.orchestrator.retry_base_secs = 0;
    config.orchestrator.retry_jitter_ms = 0;
    config.profiles = profiles;
    Session::new(
        config,
        engine,
        Arc::new(NoSnapshots),
        Box::new(LogNotifier),
        Arc::new(SystemClock),
    )
}

/// Real source directory so pre-flight reachability passes
fn reachable_source(dir: &tempfile::TempDir) -> String {
    let source = dir.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    source.to_str().unwrap().to_string()
}

const MB: u64 = 1024 * 1024;

#[test]
fn test_full_run_succeeds() {
    let dir = tempdir().unwrap();
    let source = reachable_source(&dir);
    let engine = Arc::new(ScriptedEngine::new().with_listing(
        &source,
        &[
            "New File 10485760 alpha\\a.bin",
            "New File 10485760 beta\\b.bin",
            "New File 512 notes.txt",
        ],
    ));
    let limits = ChunkLimits {
        max_size_bytes: 15 * MB,
        max_files: 1_000,
        max_depth: -1,
        min_size_bytes: 1024,
    };
    let dest = dir.path().join("dst").to_str().unwrap().to_string();
    let session = session(&dir, engine.clone(), vec![profile("main", &source, &dest, limits)]);

    let summary = session.run(None).unwrap();
    assert_eq!(summary.status(), RunStatus::Success);
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.results.len(), 1);

    // alpha + beta + a files-only chunk for the root's own file
    let result = &summary.results[0];
    assert_eq!(result.total_chunks, 3);
    assert_eq!(result.completed, 3);

    let runs = engine.runs();
    assert_eq!(runs.len(), 3);
    assert_eq!(runs.iter().filter(|r| r.files_only).count(), 1);
    // Per-chunk logs live under the dated jobs directory
    assert!(runs.iter().all(|r| {
        r.log_path
            .as_ref()
            .map(|p| p.to_string_lossy().contains("jobs"))
            .unwrap_or(false)
    }));
}

#[test]
fn test_chunk_plan_covers_listing_exactly_once() {
    let dir = tempdir().unwrap();
    let source = reachable_source(&dir);
    let engine = Arc::new(ScriptedEngine::new().with_listing(
        &source,
        &[
            "New File 20971520 big\\one.bin",
            "New File 20971520 big\\two.bin",
            "New File 20971520 other\\three.bin",
            "New File 4096 loose.txt",
        ],
    ));
    let limits = ChunkLimits {
        max_size_bytes: 30 * MB,
        max_files: 1_000,
        max_depth: -1,
        min_size_bytes: 1024,
    };
    let dest = dir.path().join("dst").to_str().unwrap().to_string();
    let session = session(&dir, engine, vec![profile("main", &source, &dest, limits)]);

    let chunks = session.plan("main").unwrap();

    // Coverage: chunk estimates add up to the listing total, and no
    // (source, files-only) pair appears twice
    let total: u64 = chunks.iter().map(|c| c.estimated_size).sum();
    assert_eq!(total, 3 * 20 * MB + 4096);

    let mut seen = std::collections::HashSet::new();
    for chunk in &chunks {
        assert!(seen.insert((chunk.source.to_lowercase(), chunk.files_only)));
    }

    // The mixed root got a files-only chunk for its loose file
    let files_only: Vec<_> = chunks.iter().filter(|c| c.files_only).collect();
    assert_eq!(files_only.len(), 1);
    assert_eq!(files_only[0].estimated_files, 1);
    assert_eq!(files_only[0].estimated_size, 4096);
}

#[test]
fn test_transient_failures_retry_to_success() {
    let dir = tempdir().unwrap();
    let source = reachable_source(&dir);
    let engine = Arc::new(
        ScriptedEngine::new().with_listing(&source, &["New File 1048576 only.bin"]),
    );
    let dest = dir.path().join("dst").to_str().unwrap().to_string();
    let session = session(
        &dir,
        engine.clone(),
        vec![profile("main", &source, &dest, ChunkLimits::default())],
    );
    // Two failures, then the third attempt lands
    engine.fail_next(&source, 2);

    let summary = session.run(None).unwrap();
    assert_eq!(summary.status(), RunStatus::Success);
    assert_eq!(engine.runs().len(), 3);
}

#[test]
fn test_exhausted_retries_fail_the_run() {
    let dir = tempdir().unwrap();
    let source = reachable_source(&dir);
    let engine = Arc::new(
        ScriptedEngine::new().with_listing(&source, &["New File 1048576 only.bin"]),
    );
    let dest = dir.path().join("dst").to_str().unwrap().to_string();
    let session = session(
        &dir,
        engine.clone(),
        vec![profile("main", &source, &dest, ChunkLimits::default())],
    );
    engine.fail_next(&source, 10);

    let summary = session.run(None).unwrap();
    assert_eq!(summary.status(), RunStatus::Failed);
    assert_eq!(summary.exit_code(), 1);
    // Initial attempt plus the configured retries
    assert_eq!(engine.runs().len(), 4);
}

#[test]
fn test_resume_runs_only_unfinished_chunks() {
    let dir = tempdir().unwrap();
    let source = reachable_source(&dir);
    let listing = [
        "New File 10485760 alpha\\a.bin",
        "New File 10485760 beta\\b.bin",
        "New File 10485760 gamma\\c.bin",
    ];
    let limits = ChunkLimits {
        max_size_bytes: 15 * MB,
        max_files: 1_000,
        max_depth: -1,
        min_size_bytes: 1024,
    };
    let dest = dir.path().join("dst").to_str().unwrap().to_string();

    // First session: gamma keeps failing and exhausts its retries
    let engine = Arc::new(ScriptedEngine::new().with_listing(&source, &listing));
    let first = session(
        &dir,
        engine.clone(),
        vec![profile("main", &source, &dest, limits)],
    );
    let gamma = format!("{}/gamma", source);
    engine.fail_next(&gamma, 10);
    let summary = first.run(None).unwrap();
    assert_eq!(summary.status(), RunStatus::Failed);
    assert_eq!(summary.results[0].completed, 2);

    // Second session over the same data dir: the two finished chunks are
    // resumed from the checkpoint, only gamma executes
    let engine2 = Arc::new(ScriptedEngine::new().with_listing(&source, &listing));
    let second = session(
        &dir,
        engine2.clone(),
        vec![profile("main", &source, &dest, limits)],
    );
    let summary = second.run(None).unwrap();

    assert_eq!(summary.status(), RunStatus::Success);
    let result = &summary.results[0];
    assert_eq!(result.resumed, 2);
    assert_eq!(result.completed, 3);

    let rerun: Vec<String> = engine2.runs().iter().map(|r| r.source.clone()).collect();
    assert_eq!(rerun.len(), 1);
    assert!(rerun[0].to_lowercase().ends_with("gamma"));
}

#[test]
fn test_cancel_token_stops_run() {
    let dir = tempdir().unwrap();
    let source = reachable_source(&dir);
    let engine = Arc::new(
        ScriptedEngine::new()
            .with_listing(
                &source,
                &[
                    "New File 10485760 alpha\\a.bin",
                    "New File 10485760 beta\\b.bin",
                    "New File 10485760 gamma\\c.bin",
                ],
            )
            .with_delay(std::time::Duration::from_secs(5)),
    );
    let limits = ChunkLimits {
        max_size_bytes: 15 * MB,
        max_files: 1_000,
        max_depth: -1,
        min_size_bytes: 1024,
    };
    let dest = dir.path().join("dst").to_str().unwrap().to_string();
    let session = session(&dir, engine, vec![profile("main", &source, &dest, limits)]);

    // Stop the run shortly after the first chunks are admitted
    let cancel = session.cancel_token();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(100));
        cancel.cancel();
    });

    let summary = session.run(None).unwrap();
    canceller.join().unwrap();

    assert_eq!(summary.status(), RunStatus::Stopped);
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.results[0].completed, 0);
}

#[test]
fn test_health_file_reflects_finished_run() {
    let dir = tempdir().unwrap();
    let source = reachable_source(&dir);
    let engine = Arc::new(
        ScriptedEngine::new().with_listing(&source, &["New File 1048576 only.bin"]),
    );
    let dest = dir.path().join("dst").to_str().unwrap().to_string();
    let session = session(
        &dir,
        engine,
        vec![profile("main", &source, &dest, ChunkLimits::default())],
    );

    session.run(None).unwrap();

    let health_path: PathBuf = dir.path().join("data").join("health.json");
    let clock: convoy::system::SharedClock = Arc::new(SystemClock);
    let status = convoy::core::health::read_status(&health_path, 60, &clock).unwrap();
    assert_eq!(status.phase, "complete");
    assert!(status.healthy);
    assert!(!status.is_stale);
    assert_eq!(status.chunks_completed, 1);
}
