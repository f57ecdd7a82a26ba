/*!
 * Session driver
 *
 * One session = one invocation of the orchestrator over a set of profiles.
 * The session owns everything with session scope: the id, the dated log
 * directory, the audit channel, startup snapshot reconciliation, pre-flight
 * checks, the per-profile orchestrator runs (wrapped in a snapshot when the
 * profile asks for one), and the terminal notification.
 */

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditEventKind, AuditLogger};
use crate::config::{AppConfig, Profile};
use crate::copier::CopierEngine;
use crate::core::cancel::CancelToken;
use crate::core::checkpoint::CheckpointStore;
use crate::core::chunker::{chunk_tree, Chunk, ChunkIdAllocator};
use crate::core::health::HealthWriter;
use crate::core::orchestrator::{
    Orchestrator, ProfileResult, ProfileStatus, RunContext,
};
use crate::core::preflight::{self, PreflightConfig};
use crate::core::profiler::Profiler;
use crate::error::{ConvoyError, Result};
use crate::notify::Notifier;
use crate::snapshot::{SnapshotDriver, SnapshotManager, TrackingRegistry};
use crate::stats::RunSummary;
use crate::system::SharedClock;

pub struct Session {
    config: AppConfig,
    engine: Arc<dyn CopierEngine>,
    snapshot_driver: Arc<dyn SnapshotDriver>,
    notifier: Box<dyn Notifier>,
    clock: SharedClock,
    cancel: CancelToken,
    session_id: String,
}

impl Session {
    pub fn new(
        config: AppConfig,
        engine: Arc<dyn CopierEngine>,
        snapshot_driver: Arc<dyn SnapshotDriver>,
        notifier: Box<dyn Notifier>,
        clock: SharedClock,
    ) -> Self {
        let session_id = format!(
            "{}_{}",
            clock.now().format("%Y%m%d-%H%M%S"),
            std::process::id()
        );
        Self {
            config,
            engine,
            snapshot_driver,
            notifier,
            clock,
            cancel: CancelToken::new(),
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Token to wire into Ctrl-C handling; cancelling it stops the run
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn profiler(&self) -> Profiler {
        Profiler::new(self.engine.clone(), self.config.cache, self.clock.clone())
    }

    /// Snapshot manager bound to this session (also used by the snapshot
    /// subcommands)
    pub fn snapshot_manager(&self) -> SnapshotManager {
        let registry = TrackingRegistry::new(
            self.config.tracking_path(),
            Duration::from_secs(self.config.snapshot.lock_timeout_secs),
        );
        SnapshotManager::new(
            self.snapshot_driver.clone(),
            registry,
            self.config.snapshot.clone(),
            self.clock.clone(),
            &self.session_id,
        )
    }

    /// Select profiles by name, or all enabled ones when none are given
    fn select_profiles(&self, names: Option<&[String]>) -> Result<Vec<Profile>> {
        match names {
            Some(names) => names
                .iter()
                .map(|name| {
                    self.config
                        .profile(name)
                        .cloned()
                        .ok_or_else(|| ConvoyError::Config(format!("unknown profile: {}", name)))
                })
                .collect(),
            None => {
                let profiles: Vec<Profile> =
                    self.config.enabled_profiles().cloned().collect();
                if profiles.is_empty() {
                    return Err(ConvoyError::Config(
                        "no enabled profiles configured".to_string(),
                    ));
                }
                Ok(profiles)
            }
        }
    }

    /// Dry-run plan: scan and chunk, touch nothing
    pub fn plan(&self, profile_name: &str) -> Result<Vec<Chunk>> {
        let profile = self
            .config
            .profile(profile_name)
            .cloned()
            .ok_or_else(|| ConvoyError::Config(format!("unknown profile: {}", profile_name)))?;
        let profiler = self.profiler();
        let tree = profiler.build_tree(&profile.source, &self.cancel, &mut |_| {})?;
        let ids = ChunkIdAllocator::new();
        chunk_tree(
            &tree,
            &profile.source,
            &profile.destination,
            &profile.effective_limits(),
            &ids,
        )
    }

    /// Run the named profiles (or all enabled) to completion
    pub fn run(&self, names: Option<&[String]>) -> Result<RunSummary> {
        let profiles = self.select_profiles(names)?;
        let started = self.clock.now();
        let mut summary = RunSummary::new(&self.session_id, started);

        let date = started.format("%Y-%m-%d").to_string();
        let logs_dir = self.config.logs_dir(&date);
        let jobs_dir = logs_dir.join("jobs");
        std::fs::create_dir_all(&jobs_dir)?;

        let audit = Arc::new(AuditLogger::new(
            &logs_dir.join(format!("audit_{}.jsonl", self.session_id)),
        )?);
        audit.emit(
            &AuditEvent::new(AuditEventKind::SessionStart, &self.session_id)
                .with_detail(&format!("{} profiles", profiles.len())),
        )?;

        let snapshot_manager = self.snapshot_manager().with_audit(audit.clone());
        match snapshot_manager.reconcile() {
            Ok(report) => {
                if report != Default::default() {
                    info!(?report, "snapshot reconciliation");
                }
            }
            Err(e) => warn!(error = %e, "snapshot reconciliation failed"),
        }

        let profiler = self.profiler();
        let checkpoint_store = CheckpointStore::new(
            self.config.checkpoint_dir(),
            self.config.orchestrator.strict_resume,
        );

        for (index, profile) in profiles.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            info!(profile = %profile.name, "starting profile");

            if let Err(e) = self.preflight(profile, &profiler) {
                warn!(profile = %profile.name, error = %e, "pre-flight failed");
                summary.preflight_failures += 1;
                summary
                    .results
                    .push(self.synthesized_result(&profile.name, ProfileStatus::Failed));
                continue;
            }

            let ctx = RunContext {
                session_id: self.session_id.clone(),
                profile_index: index,
                profile_count: profiles.len(),
                jobs_dir: Some(jobs_dir.clone()),
            };
            let health = HealthWriter::new(
                self.config.health_path(),
                self.config.orchestrator.health_interval_secs,
                self.clock.clone(),
            );
            let mut orchestrator = Orchestrator::new(
                self.engine.clone(),
                self.config.orchestrator.clone(),
                checkpoint_store.clone(),
                Some(health),
                Some(audit.clone()),
                self.clock.clone(),
                self.cancel.clone(),
                ctx,
            );

            let outcome = if profile.use_snapshot {
                snapshot_manager.with_snapshot(&profile.source, &self.cancel, |snap_source| {
                    orchestrator.run_profile(profile, &profiler, Some(snap_source))
                })
            } else {
                orchestrator.run_profile(profile, &profiler, None)
            };

            let result = match outcome {
                Ok(result) => result,
                Err(ConvoyError::Cancelled) => {
                    self.synthesized_result(&profile.name, ProfileStatus::Stopped)
                }
                Err(e) => {
                    warn!(profile = %profile.name, error = %e, "profile run failed");
                    summary
                        .results
                        .push(self.synthesized_result(&profile.name, ProfileStatus::Failed));
                    continue;
                }
            };

            // A cleanly mirrored profile starts fresh next session
            if result.status == ProfileStatus::Success && result.failed == 0 {
                checkpoint_store.clear(&profile.name);
            }

            let stopped = result.status == ProfileStatus::Stopped;
            summary.results.push(result);
            if stopped {
                break;
            }
        }

        summary.finished_at = self.clock.now();
        audit.emit(
            &AuditEvent::new(AuditEventKind::SessionEnd, &self.session_id)
                .with_status(&summary.status().to_string())
                .with_bytes(summary.total_bytes())
                .with_duration_ms(summary.duration_ms()),
        )?;

        let attachments: Vec<PathBuf> = vec![audit.path().to_path_buf()];
        match self
            .notifier
            .notify_completion(&summary, summary.status().into(), &attachments)
        {
            Ok(()) => {
                if self.config.notify_enabled {
                    let _ = audit.emit(&AuditEvent::new(
                        AuditEventKind::EmailSent,
                        &self.session_id,
                    ));
                }
            }
            Err(e) => {
                warn!(error = %e, "completion notification failed");
                if self.config.notify_enabled {
                    summary.notify_failed = true;
                }
            }
        }

        Ok(summary)
    }

    fn preflight(&self, profile: &Profile, profiler: &Profiler) -> Result<()> {
        preflight::check_source_reachable(&profile.source)?;

        let source_profile = profiler.get_profile(&profile.source, &self.cancel);
        if !source_profile.success {
            return Err(ConvoyError::SourceUnreachable(format!(
                "{}: {}",
                profile.source,
                source_profile
                    .error
                    .unwrap_or_else(|| "enumeration failed".to_string())
            )));
        }

        preflight::ensure_destination_capacity(
            &profile.destination,
            source_profile.total_size,
            &PreflightConfig::default(),
        )
    }

    fn synthesized_result(&self, name: &str, status: ProfileStatus) -> ProfileResult {
        let now = self.clock.now();
        ProfileResult {
            name: name.to_string(),
            status,
            total_chunks: 0,
            completed: 0,
            warnings: 0,
            failed: 0,
            resumed: 0,
            bytes_copied: 0,
            files_copied: 0,
            files_skipped: 0,
            files_failed: 0,
            started_at: now,
            finished_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkLimits, ScanMode};
    use crate::copier::mock::MockEngine;
    use crate::notify::{LogNotifier, NotifyStatus};
    use crate::snapshot::mock::MockSnapshotDriver;
    use crate::stats::RunStatus;
    use crate::system::SystemClock;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct RecordingNotifier {
        seen: Mutex<Vec<NotifyStatus>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn notify_completion(
            &self,
            _summary: &RunSummary,
            status: NotifyStatus,
            _attachments: &[PathBuf],
        ) -> Result<()> {
            self.seen.lock().unwrap().push(status);
            if self.fail {
                return Err(ConvoyError::Notify("smtp unreachable".to_string()));
            }
            Ok(())
        }
    }

    fn test_profile(name: &str, source: &str, dest: &str) -> Profile {
        Profile {
            name: name.to_string(),
            source: source.to_string(),
            destination: dest.to_string(),
            enabled: true,
            use_snapshot: false,
            scan_mode: ScanMode::Smart,
            limits: ChunkLimits::default(),
            copier_args: vec![],
        }
    }

    fn session_with(
        config: AppConfig,
        engine: MockEngine,
        notifier: Box<dyn Notifier>,
    ) -> Session {
        Session::new(
            config,
            Arc::new(engine),
            Arc::new(MockSnapshotDriver::new()),
            notifier,
            Arc::new(SystemClock),
        )
    }

    /// Config with its data under a tempdir and a real (reachable) source
    fn config_for(dir: &tempfile::TempDir, profiles: Vec<Profile>) -> AppConfig {
        let mut config = AppConfig::default();
        config.data_dir = Some(dir.path().join("data"));
        config.orchestrator.tick_interval_ms = 5;
        config.orchestrator.retry_base_secs = 0;
        config.profiles = profiles;
        config
    }

    #[test]
    fn test_run_all_enabled_profiles() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        let source = source.to_str().unwrap().to_string();

        let engine = MockEngine::new().with_listing(&source, &["New File 4096 report.txt"]);
        let profiles = vec![
            test_profile("one", &source, dir.path().join("dst1").to_str().unwrap()),
            test_profile("two", &source, dir.path().join("dst2").to_str().unwrap()),
        ];
        let session = session_with(
            config_for(&dir, profiles),
            engine,
            Box::new(LogNotifier),
        );

        let summary = session.run(None).unwrap();
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.status(), RunStatus::Success);
        assert_eq!(summary.exit_code(), 0);

        // Session artifacts exist: audit log and health file
        let audit_files: Vec<_> = walk_files(dir.path(), "audit_");
        assert_eq!(audit_files.len(), 1);
        assert!(session.config.health_path().exists());
    }

    #[test]
    fn test_unreachable_source_is_preflight_failure() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("src");
        std::fs::create_dir_all(&good).unwrap();
        let good = good.to_str().unwrap().to_string();

        let engine = MockEngine::new().with_listing(&good, &["New File 1 a.txt"]);
        let profiles = vec![
            test_profile("missing", "/definitely/not/here", "/tmp/dst"),
            test_profile("good", &good, dir.path().join("dst").to_str().unwrap()),
        ];
        let session = session_with(
            config_for(&dir, profiles),
            engine,
            Box::new(LogNotifier),
        );

        let summary = session.run(None).unwrap();
        assert_eq!(summary.preflight_failures, 1);
        // The healthy profile still ran
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.results[1].completed, 1);
        assert_eq!(summary.exit_code(), 2);
    }

    #[test]
    fn test_checkpoint_cleared_after_clean_run() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        let source = source.to_str().unwrap().to_string();

        let engine = MockEngine::new().with_listing(&source, &["New File 4096 report.txt"]);
        let profiles = vec![test_profile(
            "clean",
            &source,
            dir.path().join("dst").to_str().unwrap(),
        )];
        let session = session_with(
            config_for(&dir, profiles),
            engine,
            Box::new(LogNotifier),
        );

        session.run(None).unwrap();
        let store = CheckpointStore::new(session.config.checkpoint_dir(), false);
        assert!(store.load("clean").unwrap().is_none());
    }

    #[test]
    fn test_notify_failure_sets_exit_code_when_enabled() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        let source = source.to_str().unwrap().to_string();

        let engine = MockEngine::new().with_listing(&source, &["New File 1 a.txt"]);
        let profiles = vec![test_profile(
            "one",
            &source,
            dir.path().join("dst").to_str().unwrap(),
        )];
        let mut config = config_for(&dir, profiles);
        config.notify_enabled = true;
        let session = session_with(
            config,
            engine,
            Box::new(RecordingNotifier {
                seen: Mutex::new(vec![]),
                fail: true,
            }),
        );

        let summary = session.run(None).unwrap();
        assert!(summary.notify_failed);
        assert_eq!(summary.exit_code(), 3);
    }

    #[test]
    fn test_unknown_profile_rejected() {
        let dir = tempdir().unwrap();
        let session = session_with(
            config_for(&dir, vec![]),
            MockEngine::new(),
            Box::new(LogNotifier),
        );
        let err = session
            .run(Some(&["nope".to_string()]))
            .unwrap_err();
        assert!(matches!(err, ConvoyError::Config(_)));
    }

    #[test]
    fn test_plan_does_not_copy() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        let source = source.to_str().unwrap().to_string();

        let engine = Arc::new(
            MockEngine::new().with_listing(&source, &["New File 4096 report.txt"]),
        );
        let profiles = vec![test_profile(
            "one",
            &source,
            dir.path().join("dst").to_str().unwrap(),
        )];
        let session = Session::new(
            config_for(&dir, profiles),
            engine.clone(),
            Arc::new(MockSnapshotDriver::new()),
            Box::new(LogNotifier),
            Arc::new(SystemClock),
        );

        let chunks = session.plan("one").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].estimated_files, 1);
        // Planning never runs the copier in copy mode
        assert_eq!(engine.run_count(), 0);
    }

    fn walk_files(root: &std::path::Path, prefix: &str) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with(prefix))
                    .unwrap_or(false)
                {
                    found.push(path);
                }
            }
        }
        found
    }
}
