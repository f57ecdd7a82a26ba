/*!
 * Configuration structures and defaults for Convoy
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConvoyError, Result};

/// How a profile's tree is decomposed into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Recurse without a depth bound; thresholds alone decide the split
    Smart,
    /// Honor the configured depth bound
    Flat,
}

impl Default for ScanMode {
    fn default() -> Self {
        Self::Smart
    }
}

/// Log verbosity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Thresholds that shape chunk decomposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLimits {
    /// Largest chunk the splitter will accept without recursing (bytes)
    pub max_size_bytes: u64,

    /// Largest file count the splitter will accept without recursing
    pub max_files: u64,

    /// Deepest level to recurse to; -1 means unlimited
    pub max_depth: i32,

    /// Subtrees below this size are never split further (bytes)
    pub min_size_bytes: u64,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_size_bytes: 10 * 1024 * 1024 * 1024, // 10 GiB
            max_files: 50_000,
            max_depth: -1,
            min_size_bytes: 100 * 1024 * 1024, // 100 MiB
        }
    }
}

impl ChunkLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes <= self.min_size_bytes {
            return Err(ConvoyError::InvalidLimits(format!(
                "max_size_bytes ({}) must exceed min_size_bytes ({})",
                self.max_size_bytes, self.min_size_bytes
            )));
        }
        if self.max_files == 0 {
            return Err(ConvoyError::InvalidLimits(
                "max_files must be at least 1".to_string(),
            ));
        }
        if self.max_depth < -1 {
            return Err(ConvoyError::InvalidLimits(format!(
                "max_depth must be -1 (unlimited) or non-negative, got {}",
                self.max_depth
            )));
        }
        Ok(())
    }
}

/// One replication profile: a named (source, destination, options) tuple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,

    /// Source root (local or UNC)
    pub source: String,

    /// Destination root
    pub destination: String,

    /// Whether `run-all` includes this profile
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Read from a point-in-time snapshot of the source volume
    #[serde(default)]
    pub use_snapshot: bool,

    #[serde(default)]
    pub scan_mode: ScanMode,

    #[serde(default)]
    pub limits: ChunkLimits,

    /// Extra copier flags appended to every chunk of this profile
    #[serde(default)]
    pub copier_args: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Profile {
    /// Limits adjusted for the scan mode: Smart ignores any configured depth
    /// bound, Flat keeps it.
    pub fn effective_limits(&self) -> ChunkLimits {
        let mut limits = self.limits;
        if self.scan_mode == ScanMode::Smart {
            limits.max_depth = -1;
        }
        limits
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConvoyError::Config("profile name is empty".to_string()));
        }
        if self.source.trim().is_empty() || self.destination.trim().is_empty() {
            return Err(ConvoyError::Config(format!(
                "profile {} is missing a source or destination",
                self.name
            )));
        }
        self.limits.validate()
    }
}

/// Orchestrator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum concurrent copier runs
    pub max_concurrent_jobs: usize,

    /// Scheduler tick interval in milliseconds
    pub tick_interval_ms: u64,

    /// Per-chunk retry budget for retryable failures
    pub max_retries: u32,

    /// Base delay for exponential backoff (seconds)
    pub retry_base_secs: u64,

    /// Backoff ceiling (seconds)
    pub retry_max_secs: u64,

    /// Random jitter added to each backoff (milliseconds, upper bound)
    pub retry_jitter_ms: u64,

    /// Consecutive exhausted-chunk failures before the breaker trips
    pub circuit_breaker_threshold: u32,

    /// Aggregate bandwidth ceiling in bytes/sec shared by all workers
    /// (0 = unlimited)
    pub max_bandwidth_bytes_per_sec: u64,

    /// Minimum interval between health-status writes (seconds)
    pub health_interval_secs: u64,

    /// ETAs beyond this many days are reported as capped
    pub max_eta_days: i64,

    /// Refuse to resume from a checkpoint with a mismatched schema instead
    /// of dropping it
    pub strict_resume: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            tick_interval_ms: 250,
            max_retries: 3,
            retry_base_secs: 2,
            retry_max_secs: 300,
            retry_jitter_ms: 1_000,
            circuit_breaker_threshold: 5,
            max_bandwidth_bytes_per_sec: 0,
            health_interval_secs: 5,
            max_eta_days: 30,
            strict_resume: false,
        }
    }
}

/// Directory-profile cache tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Target capacity; eviction begins 10% above it
    pub max_entries: usize,

    /// Entries older than this are evicted on access
    pub max_age_hours: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            max_age_hours: 12,
        }
    }
}

/// Snapshot subsystem tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Creation attempts for retryable snapshot errors
    pub create_retries: u32,

    /// Fixed delay between creation attempts (seconds)
    pub retry_delay_secs: u64,

    /// Shadows to keep per volume when pruning (None = keep all)
    pub keep_count: Option<u32>,

    /// Unregistered shadows older than this are removed at reconcile
    pub orphan_max_age_hours: i64,

    /// Tracking-registry lock acquisition timeout (seconds)
    pub lock_timeout_secs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            create_retries: 3,
            retry_delay_secs: 10,
            keep_count: None,
            orphan_max_age_hours: 24,
            lock_timeout_secs: 30,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Copier executable (name on PATH or full path)
    #[serde(default = "default_copier")]
    pub copier_executable: PathBuf,

    /// Root for logs, checkpoints, and the health file
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Deliver completion notifications; when enabled, a delivery failure
    /// surfaces as exit code 3
    #[serde(default)]
    pub notify_enabled: bool,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub profiles: Vec<Profile>,
}

fn default_copier() -> PathBuf {
    PathBuf::from("robocopy")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            copier_executable: default_copier(),
            data_dir: None,
            log_level: LogLevel::default(),
            notify_enabled: false,
            orchestrator: OrchestratorConfig::default(),
            cache: CacheConfig::default(),
            snapshot: SnapshotConfig::default(),
            profiles: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConvoyError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&raw)
            .map_err(|e| ConvoyError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_concurrent_jobs == 0 {
            return Err(ConvoyError::Config(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for profile in &self.profiles {
            profile.validate()?;
            if !seen.insert(profile.name.to_lowercase()) {
                return Err(ConvoyError::Config(format!(
                    "duplicate profile name: {}",
                    profile.name
                )));
            }
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn enabled_profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.iter().filter(|p| p.enabled)
    }

    /// Root of all persisted state
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("convoy")
    }

    /// `logs/YYYY-MM-DD/` for the given date string
    pub fn logs_dir(&self, date: &str) -> PathBuf {
        self.data_dir().join("logs").join(date)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir().join("checkpoint")
    }

    pub fn health_path(&self) -> PathBuf {
        self.data_dir().join("health.json")
    }

    /// Snapshot tracking registry lives in the system temp directory so a
    /// crashed run's registry survives data-dir reconfiguration
    pub fn tracking_path(&self) -> PathBuf {
        std::env::temp_dir().join("convoy-vss-tracking.json")
    }
}
