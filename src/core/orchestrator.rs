/*!
 * Orchestration state machine
 *
 * One tick loop owns all run state. Workers are plain threads running the
 * copier for one chunk each; they report through a single event channel and
 * never touch orchestration state, so there is no lock around it. Each tick
 * drains worker events, dispatches completions (retry, fail, warn, count),
 * admits new jobs up to the concurrency bound, and refreshes the health
 * file.
 */

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditEventKind, AuditLogger};
use crate::config::{OrchestratorConfig, Profile};
use crate::copier::{ChunkOutcome, CopierEngine, CopyRequest, OutcomeKind};
use crate::core::backoff::BackoffPolicy;
use crate::core::bandwidth;
use crate::core::cancel::CancelToken;
use crate::core::checkpoint::{self, Checkpoint, CheckpointStore};
use crate::core::chunker::{chunk_tree, Chunk, ChunkIdAllocator, ChunkStatus};
use crate::core::circuit_breaker::CircuitBreaker;
use crate::core::health::{HealthStatus, HealthWriter};
use crate::core::paths;
use crate::core::profiler::Profiler;
use crate::core::progress::{clamp_pct, estimate_eta, EtaEstimate};
use crate::error::{ConvoyError, Result};
use crate::system::SharedClock;

/// Run phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scanning,
    Chunking,
    Replicating,
    Paused,
    Stopping,
    Complete,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Scanning => "scanning",
            Phase::Chunking => "chunking",
            Phase::Replicating => "replicating",
            Phase::Paused => "paused",
            Phase::Stopping => "stopping",
            Phase::Complete => "complete",
            Phase::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Operator commands consumed by the tick loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Stop,
    ResetBreaker,
}

/// Handle for controlling a running orchestrator from other threads
#[derive(Clone)]
pub struct ControlHandle {
    commands: Sender<Command>,
    cancel: CancelToken,
}

impl ControlHandle {
    pub fn pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.commands.send(Command::Resume);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
        // Wake the tick loop immediately; workers see the token too
        self.cancel.cancel();
    }

    pub fn reset_breaker(&self) {
        let _ = self.commands.send(Command::ResetBreaker);
    }
}

/// Worker-to-tick-loop events; the only way job state reaches the
/// orchestrator
enum JobEvent {
    Progress { chunk_id: u64, bytes: u64 },
    Done { chunk_id: u64, outcome: ChunkOutcome },
    Spawn { chunk_id: u64, error: ConvoyError },
}

struct ActiveJob {
    chunk: Chunk,
    live_bytes: u64,
    handle: Option<thread::JoinHandle<()>>,
}

/// Session-level context threaded into per-profile runs
#[derive(Debug, Clone)]
pub struct RunContext {
    pub session_id: String,
    pub profile_index: usize,
    pub profile_count: usize,
    /// Directory for per-chunk copier logs
    pub jobs_dir: Option<PathBuf>,
}

/// Terminal disposition of one profile run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileStatus {
    Success,
    Warning,
    Failed,
    Stopped,
}

impl fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfileStatus::Success => "success",
            ProfileStatus::Warning => "warning",
            ProfileStatus::Failed => "failed",
            ProfileStatus::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Aggregates for one finished profile
#[derive(Debug, Clone)]
pub struct ProfileResult {
    pub name: String,
    pub status: ProfileStatus,
    pub total_chunks: u64,
    pub completed: u64,
    pub warnings: u64,
    pub failed: u64,
    /// Chunks satisfied from the checkpoint without running
    pub resumed: u64,
    pub bytes_copied: u64,
    pub files_copied: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProfileResult {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Point-in-time view of run progress
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub chunks_total: u64,
    pub chunks_done: u64,
    pub chunks_pending: u64,
    pub chunks_failed: u64,
    pub active_jobs: usize,
    pub bytes_complete: u64,
    pub total_bytes: u64,
    pub pct: f64,
    pub eta: Option<EtaEstimate>,
}

pub struct Orchestrator {
    engine: Arc<dyn CopierEngine>,
    config: OrchestratorConfig,
    clock: SharedClock,
    cancel: CancelToken,
    backoff: BackoffPolicy,
    breaker: CircuitBreaker,
    checkpoint_store: CheckpointStore,
    health: Option<HealthWriter>,
    audit: Option<Arc<AuditLogger>>,

    commands_tx: Sender<Command>,
    commands_rx: Receiver<Command>,
    events_tx: Sender<JobEvent>,
    events_rx: Receiver<JobEvent>,

    phase: Phase,
    queue: VecDeque<Chunk>,
    active: HashMap<u64, ActiveJob>,
    completed: Vec<Chunk>,
    failed: Vec<Chunk>,
    warnings: Vec<Chunk>,
    resumed: u64,
    total_chunks: u64,
    total_bytes: u64,

    completed_bytes: u64,
    completed_files: u64,
    files_skipped: u64,
    files_failed: u64,
    scan_lines: u64,

    checkpoint: Checkpoint,
    /// Maps a chunk's logical source into the snapshot being read, when one
    /// is in use: (logical root, read root)
    read_mapping: Option<(String, String)>,
    profile_name: String,
    extra_copier_args: Vec<String>,
    run_started: DateTime<Utc>,
    stop_requested: bool,
    breaker_stop: bool,
    ctx: RunContext,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<dyn CopierEngine>,
        config: OrchestratorConfig,
        checkpoint_store: CheckpointStore,
        health: Option<HealthWriter>,
        audit: Option<Arc<AuditLogger>>,
        clock: SharedClock,
        cancel: CancelToken,
        ctx: RunContext,
    ) -> Self {
        let (commands_tx, commands_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        let backoff = BackoffPolicy::from_config(&config);
        let breaker = CircuitBreaker::new(config.circuit_breaker_threshold);
        let now = clock.now();
        let session_id = ctx.session_id.clone();
        Self {
            engine,
            config,
            clock,
            cancel,
            backoff,
            breaker,
            checkpoint_store,
            health,
            audit,
            commands_tx,
            commands_rx,
            events_tx,
            events_rx,
            phase: Phase::Idle,
            queue: VecDeque::new(),
            active: HashMap::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            warnings: Vec::new(),
            resumed: 0,
            total_chunks: 0,
            total_bytes: 0,
            completed_bytes: 0,
            completed_files: 0,
            files_skipped: 0,
            files_failed: 0,
            scan_lines: 0,
            checkpoint: Checkpoint::new(&session_id, ""),
            read_mapping: None,
            profile_name: String::new(),
            extra_copier_args: Vec::new(),
            run_started: now,
            stop_requested: false,
            breaker_stop: false,
            ctx,
        }
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            commands: self.commands_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run one profile to a terminal phase.
    ///
    /// `read_source` overrides where the tree is scanned and chunks are read
    /// from (a snapshot path); chunk identities stay anchored to the
    /// profile's logical source so checkpoints survive across snapshots.
    pub fn run_profile(
        &mut self,
        profile: &Profile,
        profiler: &Profiler,
        read_source: Option<&str>,
    ) -> Result<ProfileResult> {
        self.prepare(profile, profiler, read_source)?;

        let tick = Duration::from_millis(self.config.tick_interval_ms);
        while !matches!(self.phase, Phase::Complete | Phase::Stopped) {
            self.tick();
            if matches!(self.phase, Phase::Complete | Phase::Stopped) {
                break;
            }
            self.cancel.wait_timeout(tick);
        }

        self.write_health(true);
        Ok(self.result())
    }

    /// Scan, chunk, and resume; leaves the orchestrator in Replicating (or a
    /// terminal phase for an empty plan).
    fn prepare(
        &mut self,
        profile: &Profile,
        profiler: &Profiler,
        read_source: Option<&str>,
    ) -> Result<()> {
        self.profile_name = profile.name.clone();
        self.extra_copier_args = profile.copier_args.clone();
        self.run_started = self.clock.now();
        self.checkpoint = Checkpoint::new(&self.ctx.session_id, &profile.name);

        let logical_root = paths::normalize(&profile.source);
        let scan_root = read_source
            .map(paths::normalize)
            .unwrap_or_else(|| logical_root.clone());
        self.read_mapping = if scan_root.to_lowercase() != logical_root.to_lowercase() {
            Some((logical_root.clone(), scan_root.clone()))
        } else {
            None
        };

        self.phase = Phase::Scanning;
        info!(profile = %profile.name, source = %scan_root, "scanning source");
        self.write_health(true);

        let cancel = self.cancel.clone();
        let mut scan_lines = 0;
        let tree = profiler.build_tree(&scan_root, &cancel, &mut |lines| {
            scan_lines = lines;
            debug!(lines, "scan progress");
        })?;
        self.scan_lines = scan_lines;
        info!(lines = self.scan_lines, "scan complete");

        self.phase = Phase::Chunking;
        self.write_health(true);
        let ids = ChunkIdAllocator::new();
        let limits = profile.effective_limits();
        let mut chunks = chunk_tree(&tree, &scan_root, &profile.destination, &limits, &ids)?;

        // Re-anchor chunk identity to the logical source so fingerprints are
        // stable even though this run reads a snapshot
        if self.read_mapping.is_some() {
            for chunk in &mut chunks {
                chunk.source =
                    paths::map_to_destination(&chunk.source, &scan_root, &logical_root)?;
            }
        }

        for chunk in &mut chunks {
            chunk.copier_args = self.extra_copier_args.clone();
            if let Some(dir) = &self.ctx.jobs_dir {
                chunk.log_path = Some(dir.join(format!("chunk_{:03}.log", chunk.id)));
            }
        }

        self.total_chunks = chunks.len() as u64;
        self.total_bytes = chunks.iter().map(|c| c.estimated_size).sum();
        info!(
            profile = %profile.name,
            chunks = self.total_chunks,
            bytes = self.total_bytes,
            "chunk plan ready"
        );

        // Resume: checkpointed chunks complete without running
        if let Some(saved) = self.checkpoint_store.load(&profile.name)? {
            let summary = checkpoint::resume(&mut chunks, &saved);
            if summary.resumed_chunks > 0 {
                info!(
                    profile = %profile.name,
                    resumed = summary.resumed_chunks,
                    bytes = summary.resumed_bytes,
                    "resuming from checkpoint"
                );
            }
            self.resumed = summary.resumed_chunks;
            self.completed_bytes = summary.resumed_bytes;
            self.completed_files = summary.resumed_files;
            self.checkpoint = saved;
            self.checkpoint.session_id = self.ctx.session_id.clone();
        }

        self.queue = chunks
            .into_iter()
            .filter(|c| c.status == ChunkStatus::Pending)
            .collect();

        self.phase = if self.queue.is_empty() {
            Phase::Complete
        } else {
            Phase::Replicating
        };
        self.write_health(true);
        Ok(())
    }

    /// One scheduler pass; the only place run state mutates.
    fn tick(&mut self) {
        self.drain_commands();
        self.drain_events();

        if self.phase == Phase::Replicating && !self.breaker.is_tripped() {
            self.admit_jobs();
        }

        match self.phase {
            Phase::Replicating => {
                if self.active.is_empty() && self.queue.is_empty() {
                    self.phase = Phase::Complete;
                    self.write_health(true);
                }
            }
            Phase::Stopping => {
                if self.active.is_empty() {
                    self.phase = Phase::Stopped;
                    self.write_health(true);
                }
            }
            _ => {}
        }

        self.write_health(false);
    }

    fn drain_commands(&mut self) {
        // An externally cancelled token (Ctrl-C) is a stop request even if
        // no command was sent
        if self.cancel.is_cancelled()
            && !self.stop_requested
            && !matches!(self.phase, Phase::Complete | Phase::Stopped)
        {
            info!("cancellation signalled; stopping");
            self.stop_requested = true;
            self.phase = Phase::Stopping;
        }
        while let Ok(command) = self.commands_rx.try_recv() {
            match command {
                Command::Pause => {
                    if self.phase == Phase::Replicating {
                        info!("pausing admission; running chunks will finish");
                        self.phase = Phase::Paused;
                    }
                }
                Command::Resume => {
                    if self.phase == Phase::Paused {
                        info!("resuming");
                        self.phase = Phase::Replicating;
                    }
                }
                Command::Stop => {
                    if !matches!(self.phase, Phase::Complete | Phase::Stopped) {
                        info!("stop requested; cancelling active chunks");
                        self.stop_requested = true;
                        self.phase = Phase::Stopping;
                        self.cancel.cancel();
                    }
                }
                Command::ResetBreaker => {
                    if self.breaker.is_tripped() {
                        info!("circuit breaker reset by operator");
                        self.breaker.reset();
                        if self.breaker_stop && !self.queue.is_empty() {
                            self.breaker_stop = false;
                            self.phase = Phase::Replicating;
                        }
                    }
                }
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                JobEvent::Progress { chunk_id, bytes } => {
                    if let Some(job) = self.active.get_mut(&chunk_id) {
                        job.live_bytes = bytes;
                    }
                }
                JobEvent::Done { chunk_id, outcome } => {
                    if let Some(mut job) = self.active.remove(&chunk_id) {
                        if let Some(handle) = job.handle.take() {
                            let _ = handle.join();
                        }
                        self.dispatch_completion(job.chunk, outcome);
                    }
                }
                JobEvent::Spawn { chunk_id, error } => {
                    if let Some(mut job) = self.active.remove(&chunk_id) {
                        if let Some(handle) = job.handle.take() {
                            let _ = handle.join();
                        }
                        warn!(chunk_id, error = %error, "chunk worker failed to run copier");
                        let outcome = ChunkOutcome {
                            kind: OutcomeKind::Failure,
                            exit_code: None,
                            bytes_copied: 0,
                            files_copied: 0,
                            files_skipped: 0,
                            files_failed: 0,
                            last_error: Some(error.to_string()),
                            log_path: job.chunk.log_path.clone(),
                        };
                        self.dispatch_completion(job.chunk, outcome);
                    }
                }
            }
        }
    }

    /// Admit queued chunks up to the concurrency bound, skipping any whose
    /// retry window has not opened.
    fn admit_jobs(&mut self) {
        let now = self.clock.now();
        while self.active.len() < self.config.max_concurrent_jobs {
            let position = self
                .queue
                .iter()
                .position(|chunk| chunk.retry_after.map(|t| t <= now).unwrap_or(true));
            let Some(position) = position else { break };
            let chunk = self.queue.remove(position).expect("position in bounds");
            self.start_job(chunk);
        }
    }

    fn start_job(&mut self, mut chunk: Chunk) {
        chunk.status = ChunkStatus::Running;
        chunk.retry_after = None;

        let request = CopyRequest {
            source: self.read_source_for(&chunk),
            destination: chunk.destination.clone(),
            files_only: chunk.files_only,
            ipg_ms: bandwidth::ipg_for_share(
                self.config.max_bandwidth_bytes_per_sec,
                self.config.max_concurrent_jobs,
            ),
            extra_args: chunk.copier_args.clone(),
            log_path: chunk.log_path.clone(),
        };

        self.emit_audit(
            AuditEvent::new(AuditEventKind::ChunkStart, &self.ctx.session_id)
                .with_profile(&self.profile_name)
                .with_chunk(chunk.id, &chunk.source, &chunk.destination),
        );
        debug!(
            chunk_id = chunk.id,
            source = %request.source,
            files_only = request.files_only,
            attempt = chunk.retry_count + 1,
            "starting chunk"
        );

        let engine = self.engine.clone();
        let events = self.events_tx.clone();
        let cancel = self.cancel.clone();
        let chunk_id = chunk.id;
        let handle = thread::spawn(move || {
            let progress_events = events.clone();
            let mut on_progress = move |bytes: u64| {
                let _ = progress_events.send(JobEvent::Progress { chunk_id, bytes });
            };
            match engine.run_chunk(&request, &mut on_progress, &cancel) {
                Ok(outcome) => {
                    let _ = events.send(JobEvent::Done { chunk_id, outcome });
                }
                Err(error) => {
                    let _ = events.send(JobEvent::Spawn { chunk_id, error });
                }
            }
        });

        self.active.insert(
            chunk_id,
            ActiveJob {
                chunk,
                live_bytes: 0,
                handle: Some(handle),
            },
        );
    }

    /// Where the copier actually reads this chunk from (snapshot-aware)
    fn read_source_for(&self, chunk: &Chunk) -> String {
        if let Some((logical, read)) = &self.read_mapping {
            if let Ok(mapped) = paths::map_to_destination(&chunk.source, logical, read) {
                return mapped;
            }
        }
        chunk.source.clone()
    }

    fn dispatch_completion(&mut self, mut chunk: Chunk, outcome: ChunkOutcome) {
        chunk.last_exit_code = outcome.exit_code;
        chunk.last_error = outcome.last_error.clone();
        let now = self.clock.now();

        match outcome.kind {
            OutcomeKind::Success | OutcomeKind::SuccessWithSkipped => {
                chunk.status = ChunkStatus::Complete;
                self.completed_bytes += outcome.bytes_copied;
                self.completed_files += outcome.files_copied;
                self.files_skipped += outcome.files_skipped;
                self.breaker.record_success();

                self.checkpoint
                    .record(&chunk, outcome.bytes_copied, outcome.files_copied);
                if let Err(e) = self.checkpoint_store.save(&self.checkpoint) {
                    warn!(error = %e, "checkpoint save failed");
                }

                self.emit_audit(
                    AuditEvent::new(AuditEventKind::ChunkComplete, &self.ctx.session_id)
                        .with_profile(&self.profile_name)
                        .with_chunk(chunk.id, &chunk.source, &chunk.destination)
                        .with_bytes(outcome.bytes_copied)
                        .with_files(outcome.files_copied)
                        .with_status(&outcome.kind.to_string()),
                );
                debug!(chunk_id = chunk.id, bytes = outcome.bytes_copied, "chunk complete");
                self.completed.push(chunk);
            }
            OutcomeKind::Warning => {
                chunk.status = ChunkStatus::Warning;
                self.completed_bytes += outcome.bytes_copied;
                self.completed_files += outcome.files_copied;
                self.files_skipped += outcome.files_skipped;
                self.breaker.record_success();
                warn!(
                    chunk_id = chunk.id,
                    exit_code = ?outcome.exit_code,
                    "chunk finished with mismatches"
                );
                self.emit_audit(
                    AuditEvent::new(AuditEventKind::ChunkComplete, &self.ctx.session_id)
                        .with_profile(&self.profile_name)
                        .with_chunk(chunk.id, &chunk.source, &chunk.destination)
                        .with_bytes(outcome.bytes_copied)
                        .with_status("warning"),
                );
                self.warnings.push(chunk);
            }
            OutcomeKind::Failure => {
                self.files_failed += outcome.files_failed;
                if chunk.retry_count < self.config.max_retries {
                    let delay = self.backoff.delay(chunk.retry_count);
                    chunk.retry_count += 1;
                    chunk.status = ChunkStatus::Pending;
                    chunk.retry_after =
                        Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
                    warn!(
                        chunk_id = chunk.id,
                        attempt = chunk.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "chunk failed; scheduling retry"
                    );
                    self.emit_audit(
                        AuditEvent::new(AuditEventKind::ChunkError, &self.ctx.session_id)
                            .with_profile(&self.profile_name)
                            .with_chunk(chunk.id, &chunk.source, &chunk.destination)
                            .with_status("retrying")
                            .with_error(chunk.last_error.as_deref().unwrap_or("unknown")),
                    );
                    self.queue.push_back(chunk);
                } else {
                    chunk.status = ChunkStatus::Failed;
                    error!(
                        chunk_id = chunk.id,
                        exit_code = ?outcome.exit_code,
                        error = ?chunk.last_error,
                        "chunk failed permanently"
                    );
                    self.emit_audit(
                        AuditEvent::new(AuditEventKind::ChunkError, &self.ctx.session_id)
                            .with_profile(&self.profile_name)
                            .with_chunk(chunk.id, &chunk.source, &chunk.destination)
                            .with_status("failed")
                            .with_error(chunk.last_error.as_deref().unwrap_or("unknown")),
                    );
                    let reason = format!(
                        "chunk {} failed after {} retries",
                        chunk.id, chunk.retry_count
                    );
                    self.failed.push(chunk);
                    if self.breaker.record_failure(&reason, now) {
                        error!(
                            failures = self.breaker.failure_count(),
                            "circuit breaker tripped; draining active chunks"
                        );
                        self.breaker_stop = true;
                        self.phase = Phase::Stopping;
                    }
                }
            }
            OutcomeKind::Cancelled => {
                // Re-enqueue untouched: no retry charge, no delay
                chunk.status = ChunkStatus::Pending;
                chunk.retry_after = None;
                debug!(chunk_id = chunk.id, "chunk cancelled; re-enqueued");
                self.queue.push_back(chunk);
            }
        }
    }

    /// Aggregate progress: completed bytes plus live bytes of active jobs
    pub fn snapshot(&self) -> ProgressSnapshot {
        let live: u64 = self.active.values().map(|j| j.live_bytes).sum();
        let bytes_complete = self.completed_bytes + live;
        let chunks_done =
            self.completed.len() as u64 + self.warnings.len() as u64 + self.resumed;
        let elapsed = self.clock.now() - self.run_started;
        ProgressSnapshot {
            phase: self.phase,
            chunks_total: self.total_chunks,
            chunks_done,
            chunks_pending: self.queue.len() as u64,
            chunks_failed: self.failed.len() as u64,
            active_jobs: self.active.len(),
            bytes_complete,
            total_bytes: self.total_bytes,
            pct: clamp_pct(chunks_done, self.total_chunks),
            eta: estimate_eta(
                bytes_complete,
                self.total_bytes,
                elapsed,
                self.config.max_eta_days,
            ),
        }
    }

    fn write_health(&mut self, force: bool) {
        if self.health.is_none() {
            return;
        }
        let snapshot = self.snapshot();
        let healthy = !self.breaker.is_tripped() && self.failed.is_empty();
        let message = if self.breaker.is_tripped() {
            self.breaker.trip_reason().map(|r| r.to_string())
        } else {
            None
        };

        let status = HealthStatus {
            timestamp: self.clock.now(),
            phase: snapshot.phase.to_string(),
            current_profile: if self.profile_name.is_empty() {
                None
            } else {
                Some(self.profile_name.clone())
            },
            profile_index: self.ctx.profile_index,
            profile_count: self.ctx.profile_count,
            chunks_completed: snapshot.chunks_done,
            chunks_total: snapshot.chunks_total,
            chunks_pending: snapshot.chunks_pending,
            chunks_failed: snapshot.chunks_failed,
            active_jobs: snapshot.active_jobs,
            bytes_completed: snapshot.bytes_complete,
            eta_seconds: snapshot.eta.map(|e| e.seconds),
            eta_capped: snapshot.eta.map(|e| e.capped).unwrap_or(false),
            session_id: self.ctx.session_id.clone(),
            healthy,
            message,
            is_stale: false,
        };
        if let Some(writer) = self.health.as_mut() {
            if let Err(e) = writer.maybe_write(&status, force) {
                warn!(error = %e, "health write failed");
            }
        }
    }

    fn result(&self) -> ProfileResult {
        let status = if self.phase == Phase::Stopped {
            ProfileStatus::Stopped
        } else if !self.failed.is_empty() {
            ProfileStatus::Failed
        } else if !self.warnings.is_empty() {
            ProfileStatus::Warning
        } else {
            ProfileStatus::Success
        };
        ProfileResult {
            name: self.profile_name.clone(),
            status,
            total_chunks: self.total_chunks,
            completed: self.completed.len() as u64 + self.resumed,
            warnings: self.warnings.len() as u64,
            failed: self.failed.len() as u64,
            resumed: self.resumed,
            bytes_copied: self.completed_bytes,
            files_copied: self.completed_files,
            files_skipped: self.files_skipped,
            files_failed: self.files_failed,
            started_at: self.run_started,
            finished_at: self.clock.now(),
        }
    }

    fn emit_audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.emit(&event) {
                warn!(error = %e, "audit emit failed");
            }
        }
    }

    /// Conservation invariant: every chunk is in exactly one bucket
    #[cfg(test)]
    fn assert_conservation(&self) {
        let accounted = self.queue.len() as u64
            + self.active.len() as u64
            + self.completed.len() as u64
            + self.failed.len() as u64
            + self.warnings.len() as u64
            + self.resumed;
        assert_eq!(
            self.total_chunks, accounted,
            "chunk conservation violated: total {} accounted {}",
            self.total_chunks, accounted
        );
    }
}
