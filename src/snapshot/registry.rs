/*!
 * Snapshot tracking registry
 *
 * Every shadow this tool creates is recorded in a JSON file so that a crash
 * between creation and release leaves a reconcilable trail. Mutations are
 * serialized across processes by a session-scoped lock file with timeout,
 * and the file itself is swapped atomically with a `.bak` kept during the
 * swap so a crash mid-update always leaves a recoverable registry.
 */

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConvoyError, Result};

const LOCK_POLL: Duration = Duration::from_millis(50);

const REGISTRY_SCHEMA: u32 = 1;

/// One tracked shadow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedShadow {
    pub shadow_id: String,
    pub source_volume: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default)]
    pub is_remote: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    shadows: Vec<TrackedShadow>,
}

/// Cross-process registry handle
#[derive(Debug, Clone)]
pub struct TrackingRegistry {
    path: PathBuf,
    lock_timeout: Duration,
}

impl TrackingRegistry {
    pub fn new(path: PathBuf, lock_timeout: Duration) -> Self {
        Self { path, lock_timeout }
    }

    /// Lock file path, scoped by user so multi-user hosts cannot block each
    /// other's sessions indefinitely
    fn lock_path(&self) -> PathBuf {
        let user = std::env::var("USERNAME")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "shared".to_string());
        let name = format!(
            "{}.{}.lock",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "registry".to_string()),
            user
        );
        self.path.with_file_name(name)
    }

    /// Run `body` with the cross-process lock held. Registry mutations are a
    /// critical path: a lock timeout fails the operation.
    fn with_lock<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock_path = self.lock_path();
        let deadline = Instant::now() + self.lock_timeout;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => break,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(ConvoyError::LockTimeout(format!(
                            "snapshot registry lock {} not acquired within {:?}",
                            lock_path.display(),
                            self.lock_timeout
                        )));
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let result = body();
        let _ = fs::remove_file(&lock_path);
        result
    }

    pub fn register(&self, shadow: TrackedShadow) -> Result<()> {
        self.with_lock(|| {
            let mut file = self.load_file();
            file.shadows.retain(|s| s.shadow_id != shadow.shadow_id);
            file.shadows.push(shadow);
            self.store_atomic(&file)
        })
    }

    pub fn unregister(&self, shadow_id: &str) -> Result<()> {
        self.with_lock(|| {
            let mut file = self.load_file();
            file.shadows.retain(|s| s.shadow_id != shadow_id);
            self.store_atomic(&file)
        })
    }

    /// Drop every entry the predicate rejects; returns the removed entries
    pub fn retain(&self, keep: impl Fn(&TrackedShadow) -> bool) -> Result<Vec<TrackedShadow>> {
        self.with_lock(|| {
            let mut file = self.load_file();
            let (kept, dropped): (Vec<_>, Vec<_>) =
                file.shadows.drain(..).partition(|s| keep(s));
            file.shadows = kept;
            self.store_atomic(&file)?;
            Ok(dropped)
        })
    }

    pub fn all(&self) -> Result<Vec<TrackedShadow>> {
        self.with_lock(|| Ok(self.load_file().shadows))
    }

    pub fn contains(&self, shadow_id: &str) -> Result<bool> {
        Ok(self.all()?.iter().any(|s| s.shadow_id == shadow_id))
    }

    /// Best-effort load: a torn primary falls back to the `.bak` kept during
    /// the last swap; an unreadable registry degrades to empty with a
    /// warning rather than blocking snapshot work.
    fn load_file(&self) -> RegistryFile {
        match self.try_parse(&self.path) {
            Some(file) => file,
            None => {
                let bak = self.path.with_extension("json.bak");
                if let Some(file) = self.try_parse(&bak) {
                    warn!(
                        path = %self.path.display(),
                        "registry unreadable; recovered from backup"
                    );
                    return file;
                }
                if self.path.exists() {
                    warn!(
                        path = %self.path.display(),
                        "registry unreadable and no backup; starting empty"
                    );
                }
                RegistryFile {
                    schema_version: REGISTRY_SCHEMA,
                    shadows: Vec::new(),
                }
            }
        }
    }

    fn try_parse(&self, path: &PathBuf) -> Option<RegistryFile> {
        let raw = fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// write-temp, snapshot current to .bak, rename, drop .bak
    fn store_atomic(&self, file: &RegistryFile) -> Result<()> {
        let mut file = RegistryFile {
            schema_version: REGISTRY_SCHEMA,
            shadows: file.shadows.clone(),
        };
        file.shadows.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp = self.path.with_extension("json.tmp");
        let bak = self.path.with_extension("json.bak");

        fs::write(&temp, serde_json::to_string_pretty(&file)?)?;
        if self.path.exists() {
            fs::copy(&self.path, &bak)?;
        }
        fs::rename(&temp, &self.path)?;
        let _ = fs::remove_file(&bak);
        Ok(())
    }
}
