/*!
 * Snapshot lifecycle
 *
 * Consistent reads of a live source come from a point-in-time shadow of its
 * volume. The manager owns the lifecycle (create with retry, translate the
 * source path into the shadow, hand it to the caller, release everything in
 * reverse order) and a persistent tracking registry so crashed runs leave
 * reconcilable orphans instead of leaked shadows.
 *
 * The actual shadow operations sit behind `SnapshotDriver`; production uses
 * the command driver (vssadmin/wmic/mklink), tests use an in-memory one.
 */

mod driver;
mod manager;
mod registry;

#[cfg(test)]
pub mod mock;

pub use driver::CommandVssDriver;
pub use manager::{PruneReport, ReconcileReport, SnapshotManager};
pub use registry::{TrackedShadow, TrackingRegistry};

use chrono::{DateTime, Utc};

use crate::error::Result;

/// Originator stamp drivers report for shadows this tool created, where the
/// underlying provider can tell
pub const TOOL_ORIGINATOR: &str = "convoy";

/// A shadow as the driver reports it
#[derive(Debug, Clone)]
pub struct ShadowInfo {
    /// Opaque provider id (GUID on VSS)
    pub shadow_id: String,
    /// Filesystem path that resolves to the shadow's root
    pub shadow_path: String,
    /// Volume the shadow covers
    pub volume: String,
    pub created_at: DateTime<Utc>,
    /// Who created the shadow, when the provider records it; None when
    /// unknown, in which case the shadow is never deleted by reconciliation
    pub originator: Option<String>,
}

/// Junction exposing a remote shadow through the existing share
#[derive(Debug, Clone)]
pub struct JunctionInfo {
    /// Path of the junction on the server's filesystem (reached through the
    /// admin share)
    pub local_junction_path: String,
    /// Same junction as clients see it through the share
    pub client_accessible_path: String,
}

/// One live snapshot held by a run
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub shadow_id: String,
    pub shadow_path: String,
    pub source_volume: String,
    pub server_name: Option<String>,
    pub share_local_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_remote: bool,
    pub junction: Option<JunctionInfo>,
}

/// Shadow operations the manager depends on.
///
/// `server` is None for the local machine; drivers that can reach remote
/// hosts execute there instead.
pub trait SnapshotDriver: Send + Sync {
    fn create_shadow(&self, volume: &str, server: Option<&str>) -> Result<ShadowInfo>;

    fn delete_shadow(&self, shadow_id: &str, server: Option<&str>) -> Result<()>;

    fn list_shadows(&self, server: Option<&str>) -> Result<Vec<ShadowInfo>>;

    /// Resolve a share name to its local path on the hosting server
    fn resolve_share(&self, server: &str, share: &str) -> Result<String>;

    fn create_junction(&self, junction_path: &str, target: &str) -> Result<()>;

    fn remove_junction(&self, junction_path: &str) -> Result<()>;
}
