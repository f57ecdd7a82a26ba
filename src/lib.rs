/*!
 * Convoy - chunked parallel file-replication orchestrator
 *
 * Drives an external robocopy-style copier to mirror large directory trees,
 * including high-latency network shares. Features include:
 * - Single-pass directory profiling through the copier's list-only mode
 * - Tree decomposition into balanced chunks with files-only splitting
 * - A bounded worker pool with retry, backoff, and a circuit breaker
 * - Checkpointed resume that skips already-replicated chunks
 * - Optional point-in-time volume snapshots for consistent source reads
 * - Aggregate bandwidth limiting, progress/ETA, and a health status file
 */

pub mod audit;
pub mod config;
pub mod copier;
pub mod core;
pub mod error;
pub mod logging;
pub mod notify;
pub mod session;
pub mod snapshot;
pub mod stats;
pub mod system;

// Re-export commonly used types for convenience
pub use config::{AppConfig, ChunkLimits, LogLevel, Profile, ScanMode};
pub use copier::{ChunkOutcome, CopierEngine, OutcomeKind, RobocopyEngine};
pub use core::cancel::CancelToken;
pub use core::chunker::{Chunk, ChunkStatus};
pub use core::orchestrator::{
    ControlHandle, Phase, ProfileResult, ProfileStatus, ProgressSnapshot,
};
pub use error::{ConvoyError, ErrorCategory, Result};
pub use notify::{LogNotifier, Notifier, NotifyStatus};
pub use session::Session;
pub use snapshot::{CommandVssDriver, SnapshotDriver, SnapshotManager};
pub use stats::{RunStatus, RunSummary};
pub use system::{Clock, SystemClock};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
