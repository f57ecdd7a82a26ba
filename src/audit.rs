/*!
 * Audit logging for Convoy sessions
 *
 * A parallel channel to the diagnostic log: structured events (session
 * boundaries, chunk lifecycle, snapshot lifecycle, configuration changes,
 * notifications) appended as single-line JSON with UTC timestamps. The file
 * is append-only; a crashed run leaves every event it managed to emit.
 */

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{ConvoyError, Result};

/// Audit event taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventKind {
    SessionStart,
    SessionEnd,
    ChunkStart,
    ChunkComplete,
    ChunkError,
    ConfigChange,
    EmailSent,
    VssSnapshotCreated,
    VssSnapshotRemoved,
}

/// One audit record; optional fields are omitted from the JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// ISO 8601 timestamp, UTC
    pub timestamp: String,

    pub event: AuditEventKind,

    pub session_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Free-form context (shadow id, config key, recipient, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, session_id: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: kind,
            session_id: session_id.to_string(),
            profile: None,
            chunk_id: None,
            source: None,
            destination: None,
            bytes: None,
            files: None,
            duration_ms: None,
            status: None,
            error: None,
            detail: None,
        }
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_chunk(mut self, chunk_id: u64, source: &str, destination: &str) -> Self {
        self.chunk_id = Some(chunk_id);
        self.source = Some(source.to_string());
        self.destination = Some(destination.to_string());
        self
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn with_files(mut self, files: u64) -> Self {
        self.files = Some(files);
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

/// Thread-safe append-only JSONL writer
pub struct AuditLogger {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl AuditLogger {
    /// Open (or create) the audit file in append mode
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConvoyError::Config(format!("cannot create audit dir: {}", e)))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                ConvoyError::Config(format!("cannot open audit log {}: {}", path.display(), e))
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single JSON line and flush it
    pub fn emit(&self, event: &AuditEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Read every event from an audit file (used by run statistics)
pub fn read_audit_log(path: &Path) -> Result<Vec<AuditEvent>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEvent>(&line) {
            Ok(event) => events.push(event),
            Err(_) => continue, // tolerate partial trailing lines from a crash
        }
    }
    Ok(events)
}
