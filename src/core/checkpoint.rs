/*!
 * Checkpointed recovery
 *
 * Each profile's run persists the identities of completed chunks plus the
 * cumulative byte/file counters. On restart the chunker re-emits the full
 * plan and the checkpoint marks the already-done chunks complete without
 * running them. Writes are temp-then-rename so a crash never leaves a torn
 * checkpoint behind.
 */

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::chunker::{Chunk, ChunkStatus};
use crate::error::{ConvoyError, Result};

/// Bump when the persisted layout changes shape
pub const SCHEMA_VERSION: u32 = 2;

/// Persisted recovery record for one profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema_version: u32,
    pub session_id: String,
    pub profile_name: String,
    /// Fingerprints of chunks that completed (source, destination,
    /// files-only), normalized
    pub completed_fingerprints: BTreeSet<String>,
    pub completed_bytes: u64,
    pub completed_files: u64,
}

impl Checkpoint {
    pub fn new(session_id: &str, profile_name: &str) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            session_id: session_id.to_string(),
            profile_name: profile_name.to_string(),
            completed_fingerprints: BTreeSet::new(),
            completed_bytes: 0,
            completed_files: 0,
        }
    }

    /// Record one completed chunk and its contribution to the aggregates
    pub fn record(&mut self, chunk: &Chunk, bytes: u64, files: u64) {
        self.completed_fingerprints.insert(chunk.fingerprint());
        self.completed_bytes += bytes;
        self.completed_files += files;
    }

    pub fn contains(&self, chunk: &Chunk) -> bool {
        self.completed_fingerprints.contains(&chunk.fingerprint())
    }
}

/// Counters restored by a resume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeSummary {
    pub resumed_chunks: u64,
    pub resumed_bytes: u64,
    pub resumed_files: u64,
}

/// Mark every chunk the checkpoint already covers as complete.
///
/// The restored byte/file counters come from the checkpoint's aggregates so
/// downstream progress math is exact, not re-estimated.
pub fn resume(chunks: &mut [Chunk], checkpoint: &Checkpoint) -> ResumeSummary {
    let mut resumed = 0;
    for chunk in chunks.iter_mut() {
        if checkpoint.contains(chunk) {
            chunk.status = ChunkStatus::Complete;
            resumed += 1;
        }
    }
    ResumeSummary {
        resumed_chunks: resumed,
        resumed_bytes: checkpoint.completed_bytes,
        resumed_files: checkpoint.completed_files,
    }
}

/// Filesystem store, one JSON checkpoint per profile
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    /// Refuse to resume on schema mismatch instead of dropping the record
    strict: bool,
}

impl CheckpointStore {
    pub fn new(dir: PathBuf, strict: bool) -> Self {
        Self { dir, strict }
    }

    fn path_for(&self, profile_name: &str) -> PathBuf {
        let stem: String = profile_name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", stem))
    }

    /// Atomically persist the checkpoint (write temp, rename over target)
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path_for(&checkpoint.profile_name);
        let temp = target.with_extension("json.tmp");

        let body = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&temp, body)?;
        fs::rename(&temp, &target)?;
        Ok(())
    }

    /// Load a profile's checkpoint if one exists.
    ///
    /// Unreadable or schema-mismatched records are dropped with a warning
    /// (the file is removed so the next save starts clean); strict mode
    /// surfaces them as `CorruptState` instead.
    pub fn load(&self, profile_name: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(profile_name);
        if !path.exists() {
            return Ok(None);
        }

        let parsed = fs::read_to_string(&path)
            .map_err(|e| ConvoyError::CorruptState(format!("checkpoint unreadable: {}", e)))
            .and_then(|raw| {
                serde_json::from_str::<Checkpoint>(&raw)
                    .map_err(|e| ConvoyError::CorruptState(format!("checkpoint unparseable: {}", e)))
            })
            .and_then(|cp| {
                if cp.schema_version != SCHEMA_VERSION {
                    Err(ConvoyError::CorruptState(format!(
                        "checkpoint schema {} does not match expected {}",
                        cp.schema_version, SCHEMA_VERSION
                    )))
                } else {
                    Ok(cp)
                }
            });

        match parsed {
            Ok(cp) => Ok(Some(cp)),
            Err(e) if self.strict => Err(e),
            Err(e) => {
                warn!(
                    profile = profile_name,
                    path = %path.display(),
                    error = %e,
                    "dropping unusable checkpoint"
                );
                let _ = fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    /// Remove a profile's checkpoint after a fully successful run
    pub fn clear(&self, profile_name: &str) {
        let path = self.path_for(profile_name);
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chunk(id: u64, source: &str, files_only: bool) -> Chunk {
        Chunk {
            id,
            source: source.to_string(),
            destination: format!("E:\\mirror\\{}", id),
            estimated_size: 1024,
            estimated_files: 4,
            depth: 1,
            files_only,
            status: ChunkStatus::Pending,
            retry_count: 0,
            retry_after: None,
            last_exit_code: None,
            last_error: None,
            copier_args: vec![],
            log_path: None,
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf(), false);

        let mut cp = Checkpoint::new("sess-1", "projects");
        cp.record(&chunk(0, "C:\\data\\a", false), 4096, 12);
        cp.record(&chunk(1, "C:\\data\\b", true), 100, 3);

        store.save(&cp).unwrap();
        let loaded = store.load("projects").unwrap().unwrap();
        assert_eq!(loaded, cp);
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf(), false);
        assert!(store.load("nothing").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_checkpoint_dropped() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf(), false);
        std::fs::write(dir.path().join("projects.json"), "{not json").unwrap();

        assert!(store.load("projects").unwrap().is_none());
        // The bad artifact is gone
        assert!(!dir.path().join("projects.json").exists());
    }

    #[test]
    fn test_corrupt_checkpoint_strict_refuses() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf(), true);
        std::fs::write(dir.path().join("projects.json"), "{not json").unwrap();

        let err = store.load("projects").unwrap_err();
        assert!(matches!(err, ConvoyError::CorruptState(_)));
    }

    #[test]
    fn test_schema_mismatch_dropped() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf(), false);

        let mut cp = Checkpoint::new("sess-1", "projects");
        cp.schema_version = 1;
        let raw = serde_json::to_string(&cp).unwrap();
        std::fs::write(dir.path().join("projects.json"), raw).unwrap();

        assert!(store.load("projects").unwrap().is_none());
    }

    #[test]
    fn test_resume_marks_completed_chunks() {
        let mut chunks: Vec<Chunk> = (0..50)
            .map(|i| chunk(i, &format!("C:\\data\\{}", i), false))
            .collect();

        let mut cp = Checkpoint::new("sess-1", "projects");
        for done in chunks.iter().take(37) {
            cp.record(done, 1_000, 10);
        }

        let summary = resume(&mut chunks, &cp);
        assert_eq!(summary.resumed_chunks, 37);
        assert_eq!(summary.resumed_bytes, 37_000);
        assert_eq!(summary.resumed_files, 370);

        let complete = chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Complete)
            .count();
        let pending = chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Pending)
            .count();
        assert_eq!(complete, 37);
        assert_eq!(pending, 13);
    }

    #[test]
    fn test_fingerprint_distinguishes_files_only() {
        let tree_chunk = chunk(0, "C:\\data", false);
        let files_chunk = {
            let mut c = chunk(0, "C:\\data", true);
            c.destination = tree_chunk.destination.clone();
            c
        };

        let mut cp = Checkpoint::new("sess-1", "projects");
        cp.record(&tree_chunk, 1, 1);
        assert!(cp.contains(&tree_chunk));
        assert!(!cp.contains(&files_chunk));
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf(), false);
        let cp = Checkpoint::new("sess-1", "projects");
        store.save(&cp).unwrap();
        assert!(store.load("projects").unwrap().is_some());

        store.clear("projects");
        assert!(store.load("projects").unwrap().is_none());
    }
}
