/*!
 * Health status file
 *
 * External monitors watch one JSON document describing the run. The writer
 * is interval-gated and atomic (temp + rename); the reader applies a
 * staleness threshold so a hung or dead orchestrator reads as unhealthy
 * even though its last words claimed otherwise.
 */

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConvoyError, Result};
use crate::system::SharedClock;

/// Snapshot of run health written for external monitors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub timestamp: DateTime<Utc>,
    pub phase: String,
    pub current_profile: Option<String>,
    pub profile_index: usize,
    pub profile_count: usize,
    pub chunks_completed: u64,
    pub chunks_total: u64,
    pub chunks_pending: u64,
    pub chunks_failed: u64,
    pub active_jobs: usize,
    pub bytes_completed: u64,
    pub eta_seconds: Option<i64>,
    #[serde(default)]
    pub eta_capped: bool,
    pub session_id: String,
    pub healthy: bool,
    pub message: Option<String>,
    /// Set by the reader, never persisted as true by the writer
    #[serde(default)]
    pub is_stale: bool,
}

/// Interval-gated atomic writer
pub struct HealthWriter {
    path: PathBuf,
    interval: Duration,
    last_write: Option<DateTime<Utc>>,
    clock: SharedClock,
}

impl HealthWriter {
    pub fn new(path: PathBuf, interval_secs: u64, clock: SharedClock) -> Self {
        Self {
            path,
            interval: Duration::seconds(interval_secs as i64),
            last_write: None,
            clock,
        }
    }

    /// Write the status if the interval elapsed (or `force`). Returns
    /// whether a write happened.
    pub fn maybe_write(&mut self, status: &HealthStatus, force: bool) -> Result<bool> {
        let now = self.clock.now();
        if !force {
            if let Some(last) = self.last_write {
                if now - last < self.interval {
                    return Ok(false);
                }
            }
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, serde_json::to_string_pretty(status)?)?;
        fs::rename(&temp, &self.path)?;
        self.last_write = Some(now);
        Ok(true)
    }
}

/// Read a status file, marking it stale (and unhealthy) when its timestamp
/// is older than `max_age_secs`.
pub fn read_status(path: &Path, max_age_secs: i64, clock: &SharedClock) -> Result<HealthStatus> {
    let raw = fs::read_to_string(path)
        .map_err(|e| ConvoyError::CorruptState(format!("health file unreadable: {}", e)))?;
    let mut status: HealthStatus = serde_json::from_str(&raw)
        .map_err(|e| ConvoyError::CorruptState(format!("health file unparseable: {}", e)))?;

    let age = clock.now() - status.timestamp;
    if age > Duration::seconds(max_age_secs) {
        status.is_stale = true;
        status.healthy = false;
    }
    Ok(status)
}
