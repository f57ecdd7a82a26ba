/*!
 * Snapshot manager
 *
 * Owns the create → translate → use → release lifecycle around a body of
 * work, the retry classification for creation, startup reconciliation of
 * orphans, and the per-volume retention policy. Release runs on every exit
 * path, including panics, and always in reverse order: junction first, then
 * shadow.
 */

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::{
    JunctionInfo, Snapshot, SnapshotDriver, TrackedShadow, TrackingRegistry, TOOL_ORIGINATOR,
};
use crate::audit::{AuditEvent, AuditEventKind, AuditLogger};
use crate::config::SnapshotConfig;
use crate::core::cancel::CancelToken;
use crate::core::paths;
use crate::error::{ConvoyError, Result};
use crate::system::SharedClock;

/// Error codes that justify another creation attempt: insufficient shadow
/// storage, a concurrent shadow operation, writer/flush timeouts, transient
/// RPC failures, lock violations.
const RETRYABLE_CODES: &[&str] = &[
    "0x8004231f", // insufficient storage for the shadow copy
    "0x80042316", // another shadow copy operation is in progress
    "0x80042314", // hold-writes timeout
    "0x800705b4", // generic timeout
    "0x800706ba", // RPC server unavailable
    "0x800706be", // RPC call failed
    "0x80070021", // lock violation
];

/// Last-resort phrase matching when no code is present in the message
const RETRYABLE_PHRASES: &[&str] = &[
    "insufficient storage",
    "shadow copy operation is already in progress",
    "another shadow copy operation",
    "timed out",
    "timeout",
    "rpc server",
    "temporarily unavailable",
    "lock violation",
];

/// Decide whether a snapshot error is worth retrying. Codes are the primary
/// mechanism; a phrase match is logged because it means the code table did
/// not cover the case.
fn is_retryable(err: &ConvoyError) -> bool {
    if let ConvoyError::Snapshot {
        retryable: true, ..
    } = err
    {
        return true;
    }
    let text = err.to_string().to_lowercase();
    if RETRYABLE_CODES.iter().any(|code| text.contains(code)) {
        return true;
    }
    if let Some(phrase) = RETRYABLE_PHRASES.iter().find(|p| text.contains(*p)) {
        warn!(phrase, error = %err, "retry decision made by phrase fallback");
        return true;
    }
    false
}

/// Result of startup reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Registry entries whose shadow no longer exists
    pub dropped_entries: usize,
    /// Tool-created shadows past the orphan age, removed
    pub removed_orphans: usize,
    /// Tool-created shadows young enough to re-register
    pub reregistered: usize,
    /// Shadows not created by this tool; reported, never touched
    pub external: usize,
}

/// Result of applying the retention policy to one volume
#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    /// Registered shadows kept by the policy
    pub kept: usize,
    /// Shadows on the volume outside this tool's registry
    pub external: usize,
}

pub struct SnapshotManager {
    driver: Arc<dyn SnapshotDriver>,
    registry: TrackingRegistry,
    config: SnapshotConfig,
    clock: SharedClock,
    audit: Option<Arc<AuditLogger>>,
    session_id: String,
}

impl SnapshotManager {
    pub fn new(
        driver: Arc<dyn SnapshotDriver>,
        registry: TrackingRegistry,
        config: SnapshotConfig,
        clock: SharedClock,
        session_id: &str,
    ) -> Self {
        Self {
            driver,
            registry,
            config,
            clock,
            audit: None,
            session_id: session_id.to_string(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Run `body` against a snapshot view of `source`.
    ///
    /// The closure receives the path to read instead of `source`: the same
    /// data, frozen at snapshot time. Whatever happens inside (success,
    /// error, panic), the junction is removed first and the shadow released
    /// second before this returns; the body's error reaches the caller
    /// unchanged.
    pub fn with_snapshot<T>(
        &self,
        source: &str,
        cancel: &CancelToken,
        body: impl FnOnce(&str) -> Result<T>,
    ) -> Result<T> {
        let snapshot = self.acquire(source, cancel)?;
        let snapshot_source = translate_source(&snapshot, source)?;
        info!(
            source,
            snapshot_source,
            shadow_id = %snapshot.shadow_id,
            "reading through snapshot"
        );

        struct ReleaseGuard<'a> {
            manager: &'a SnapshotManager,
            snapshot: Option<Snapshot>,
        }
        impl Drop for ReleaseGuard<'_> {
            fn drop(&mut self) {
                if let Some(snapshot) = self.snapshot.take() {
                    self.manager.release(&snapshot);
                }
            }
        }

        let mut guard = ReleaseGuard {
            manager: self,
            snapshot: Some(snapshot),
        };
        let result = body(&snapshot_source);
        if let Some(snapshot) = guard.snapshot.take() {
            self.release(&snapshot);
        }
        result
    }

    /// Create, register, and (for remote sources) expose a snapshot
    fn acquire(&self, source: &str, cancel: &CancelToken) -> Result<Snapshot> {
        let is_remote = paths::is_unc(source);
        let (server, share, share_local) = if is_remote {
            let (server, rest) = paths::unc_parts(source).ok_or_else(|| {
                ConvoyError::Config(format!("malformed UNC source: {}", source))
            })?;
            let share = rest
                .split(paths::SEP)
                .next()
                .unwrap_or_default()
                .to_string();
            let local = self.driver.resolve_share(&server, &share)?;
            (Some(server), Some(share), Some(paths::normalize(&local)))
        } else {
            (None, None, None)
        };

        let volume = match &share_local {
            Some(local) => paths::volume_root(local)?,
            None => paths::volume_root(source)?,
        };

        let info = self.create_with_retry(&volume, server.as_deref(), cancel)?;

        let tracked = TrackedShadow {
            shadow_id: info.shadow_id.clone(),
            source_volume: volume.clone(),
            created_at: info.created_at,
            server_name: server.clone(),
            is_remote,
        };
        if let Err(e) = self.registry.register(tracked) {
            // An untracked shadow is a leak; give it back before failing
            let _ = self.driver.delete_shadow(&info.shadow_id, server.as_deref());
            return Err(e);
        }
        self.emit_audit(
            AuditEvent::new(AuditEventKind::VssSnapshotCreated, &self.session_id)
                .with_source(source)
                .with_detail(&info.shadow_id),
        );

        let mut snapshot = Snapshot {
            shadow_id: info.shadow_id,
            shadow_path: paths::normalize(&info.shadow_path),
            source_volume: volume,
            server_name: server.clone(),
            share_local_path: share_local.clone(),
            created_at: info.created_at,
            is_remote,
            junction: None,
        };

        if let (Some(server), Some(share), Some(share_local)) =
            (server.as_deref(), share.as_deref(), share_local.as_deref())
        {
            match self.mount_junction(&snapshot, server, share, share_local) {
                Ok(junction) => snapshot.junction = Some(junction),
                Err(e) => {
                    self.release(&snapshot);
                    return Err(e);
                }
            }
        }

        Ok(snapshot)
    }

    fn create_with_retry(
        &self,
        volume: &str,
        server: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<super::ShadowInfo> {
        let mut attempt = 0;
        loop {
            match self.driver.create_shadow(volume, server) {
                Ok(info) => return Ok(info),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.create_retries
                        || !is_retryable(&e)
                        || cancel.is_cancelled()
                    {
                        return Err(e);
                    }
                    warn!(
                        volume,
                        attempt,
                        error = %e,
                        "snapshot creation failed; retrying"
                    );
                    if cancel.wait_timeout(Duration::from_secs(self.config.retry_delay_secs)) {
                        return Err(ConvoyError::Cancelled);
                    }
                }
            }
        }
    }

    /// Create the junction that exposes a remote shadow through the share
    fn mount_junction(
        &self,
        snapshot: &Snapshot,
        server: &str,
        share: &str,
        share_local: &str,
    ) -> Result<JunctionInfo> {
        let name = format!(
            ".convoy-snap-{}",
            snapshot
                .shadow_id
                .trim_matches(|c| c == '{' || c == '}')
                .chars()
                .take(8)
                .collect::<String>()
        );

        let local_junction_path = paths::join(share_local, &name);
        // The shadow covers the whole volume; point the junction at the
        // share's directory inside it
        let volume = paths::volume_root(share_local)?;
        let below_volume = path_below_volume(share_local, &volume);
        let target = paths::join(&snapshot.shadow_path, &below_volume);

        let admin_path = admin_share_path(server, &local_junction_path)?;
        self.driver.create_junction(&admin_path, &target)?;

        Ok(JunctionInfo {
            local_junction_path,
            client_accessible_path: format!("\\\\{}\\{}\\{}", server, share, name),
        })
    }

    /// Release in reverse order of acquisition: junction, then shadow, then
    /// the registry entry. Failures are warnings; a leaked shadow is
    /// reconciled at the next startup.
    pub fn release(&self, snapshot: &Snapshot) {
        if let Some(junction) = &snapshot.junction {
            let path = match snapshot.server_name.as_deref() {
                Some(server) => admin_share_path(server, &junction.local_junction_path)
                    .unwrap_or_else(|_| junction.local_junction_path.clone()),
                None => junction.local_junction_path.clone(),
            };
            if let Err(e) = self.driver.remove_junction(&path) {
                warn!(junction = %path, error = %e, "junction removal failed");
            }
        }

        match self
            .driver
            .delete_shadow(&snapshot.shadow_id, snapshot.server_name.as_deref())
        {
            Ok(()) => {
                if let Err(e) = self.registry.unregister(&snapshot.shadow_id) {
                    warn!(shadow_id = %snapshot.shadow_id, error = %e, "unregister failed");
                }
                self.emit_audit(
                    AuditEvent::new(AuditEventKind::VssSnapshotRemoved, &self.session_id)
                        .with_detail(&snapshot.shadow_id),
                );
            }
            Err(e) => {
                // Keep the registry entry so reconciliation can finish the job
                warn!(shadow_id = %snapshot.shadow_id, error = %e, "shadow release failed");
            }
        }
    }

    /// Startup reconciliation between the registry and the shadows that
    /// actually exist.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let tracked = self.registry.all()?;

        // Collect the live shadows on every host the registry mentions,
        // plus the local machine
        let mut servers: Vec<Option<String>> = vec![None];
        for entry in &tracked {
            if let Some(server) = &entry.server_name {
                if !servers.iter().any(|s| s.as_deref() == Some(server)) {
                    servers.push(Some(server.clone()));
                }
            }
        }

        let mut live = Vec::new();
        for server in &servers {
            match self.driver.list_shadows(server.as_deref()) {
                Ok(mut shadows) => live.append(&mut shadows),
                Err(e) => {
                    warn!(server = ?server, error = %e, "shadow listing failed during reconcile");
                }
            }
        }

        // Drop registry entries whose shadow is gone
        let dropped = self.registry.retain(|entry| {
            live.iter()
                .any(|s| s.shadow_id.eq_ignore_ascii_case(&entry.shadow_id))
        })?;
        report.dropped_entries = dropped.len();
        for entry in &dropped {
            info!(shadow_id = %entry.shadow_id, "dropped stale registry entry");
        }

        // Classify shadows the registry does not know about
        let tracked = self.registry.all()?;
        let now = self.clock.now();
        let orphan_age = chrono::Duration::hours(self.config.orphan_max_age_hours);
        for shadow in &live {
            if tracked
                .iter()
                .any(|e| e.shadow_id.eq_ignore_ascii_case(&shadow.shadow_id))
            {
                continue;
            }
            if shadow.originator.as_deref() != Some(TOOL_ORIGINATOR) {
                report.external += 1;
                continue;
            }
            if now - shadow.created_at > orphan_age {
                match self.driver.delete_shadow(&shadow.shadow_id, None) {
                    Ok(()) => {
                        report.removed_orphans += 1;
                        info!(shadow_id = %shadow.shadow_id, "removed aged orphan shadow");
                    }
                    Err(e) => {
                        warn!(shadow_id = %shadow.shadow_id, error = %e, "orphan removal failed")
                    }
                }
            } else {
                self.registry.register(TrackedShadow {
                    shadow_id: shadow.shadow_id.clone(),
                    source_volume: shadow.volume.clone(),
                    created_at: shadow.created_at,
                    server_name: None,
                    is_remote: false,
                })?;
                report.reregistered += 1;
            }
        }

        Ok(report)
    }

    /// Apply the retention policy: keep the newest `keep_count` registered
    /// shadows of `volume`, delete the rest. Shadows outside the registry
    /// are reported but never deleted.
    pub fn prune(&self, volume: &str, keep_count: u32) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        let registered = self.registry.all()?;
        let mut candidates: Vec<_> = self
            .driver
            .list_shadows(None)?
            .into_iter()
            .filter(|s| paths::eq_ignore_case(&s.volume, volume))
            .collect();
        candidates.sort_by_key(|s| s.created_at);

        let (mine, external): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|s| {
            registered
                .iter()
                .any(|e| e.shadow_id.eq_ignore_ascii_case(&s.shadow_id))
        });
        report.external = external.len();

        let excess = mine.len().saturating_sub(keep_count as usize);
        for shadow in mine.iter().take(excess) {
            match self.driver.delete_shadow(&shadow.shadow_id, None) {
                Ok(()) => {
                    let _ = self.registry.unregister(&shadow.shadow_id);
                    self.emit_audit(
                        AuditEvent::new(AuditEventKind::VssSnapshotRemoved, &self.session_id)
                            .with_detail(&shadow.shadow_id),
                    );
                    report.deleted.push(shadow.shadow_id.clone());
                }
                Err(e) => {
                    warn!(shadow_id = %shadow.shadow_id, error = %e, "retention delete failed")
                }
            }
        }
        report.kept = mine.len() - report.deleted.len();
        Ok(report)
    }

    fn emit_audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.emit(&event) {
                warn!(error = %e, "audit emit failed");
            }
        }
    }
}

/// Path to read instead of `source`, through the snapshot
fn translate_source(snapshot: &Snapshot, source: &str) -> Result<String> {
    if let Some(junction) = &snapshot.junction {
        // Remote: client path through the share's junction
        let share_root = paths::volume_root(source)?;
        let normalized = paths::normalize(source);
        let remainder = normalized[share_root.len()..].trim_start_matches(paths::SEP);
        return Ok(paths::join(&junction.client_accessible_path, remainder));
    }
    // Local: same path, re-rooted inside the shadow device
    let volume = &snapshot.source_volume;
    let normalized = paths::normalize(source);
    if !paths::starts_with_root(&normalized, volume) {
        return Err(ConvoyError::PathMismatch {
            path: normalized,
            root: volume.clone(),
        });
    }
    let remainder = normalized[volume.len()..].trim_start_matches(paths::SEP);
    Ok(paths::join(&snapshot.shadow_path, remainder))
}

/// Portion of `path` below its volume root
fn path_below_volume(path: &str, volume: &str) -> String {
    paths::normalize(path)[volume.len()..]
        .trim_start_matches(paths::SEP)
        .to_string()
}

/// Address a server-local path through the administrative share
/// ("D:\Shares\x" on nas01 -> "\\nas01\d$\Shares\x")
fn admin_share_path(server: &str, local_path: &str) -> Result<String> {
    let normalized = paths::normalize(local_path);
    let drive = normalized
        .chars()
        .next()
        .filter(|c| c.is_ascii_alphabetic())
        .ok_or_else(|| ConvoyError::Config(format!("not a drive path: {}", normalized)))?;
    let rest = normalized[2..].trim_start_matches(paths::SEP);
    Ok(format!(
        "\\\\{}\\{}$\\{}",
        server,
        drive.to_ascii_lowercase(),
        rest
    ))
}
