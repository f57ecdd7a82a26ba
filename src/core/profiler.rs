/*!
 * Directory profiler
 *
 * Builds the in-memory directory tree from a single list-only enumeration
 * streamed out of the copier, and answers lightweight size/count queries
 * through the profile cache. Multi-root profiling fans out across a small
 * worker pool once the root count makes threads worthwhile.
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::copier::{parse_list_line, CopierEngine, ListEntry};
use crate::core::cache::{CacheStats, ProfileCache};
use crate::core::cancel::CancelToken;
use crate::core::paths;
use crate::core::tree::DirectoryTree;
use crate::error::{ConvoyError, Result};
use crate::system::SharedClock;

/// Scan progress is surfaced to the caller every this many lines
pub const SCAN_PROGRESS_EVERY: u64 = 1_000;

/// Roots below this count are profiled sequentially
const PARALLEL_THRESHOLD: usize = 3;

/// Lightweight answer to "how big is this directory"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryProfile {
    pub path: String,
    pub total_size: u64,
    pub file_count: u64,
    pub dir_count: u64,
    pub avg_file_size: u64,
    pub last_scanned: chrono::DateTime<chrono::Utc>,
    /// Distinguishes a genuinely empty directory from a failed enumeration
    pub success: bool,
    pub error: Option<String>,
}

impl DirectoryProfile {
    fn from_tree(tree: &DirectoryTree, clock: &SharedClock) -> Self {
        let root = tree.root();
        let file_count = root.total_files;
        let total_size = root.total_size;
        Self {
            path: root.path.clone(),
            total_size,
            file_count,
            dir_count: tree.dir_count(),
            avg_file_size: if file_count > 0 {
                total_size / file_count
            } else {
                0
            },
            last_scanned: clock.now(),
            success: true,
            error: None,
        }
    }

    fn failed(path: &str, error: String, clock: &SharedClock) -> Self {
        Self {
            path: paths::normalize(path),
            total_size: 0,
            file_count: 0,
            dir_count: 0,
            avg_file_size: 0,
            last_scanned: clock.now(),
            success: false,
            error: Some(error),
        }
    }
}

/// Profiler with its process-wide cache
#[derive(Clone)]
pub struct Profiler {
    engine: Arc<dyn CopierEngine>,
    cache: Arc<ProfileCache>,
    clock: SharedClock,
}

impl Profiler {
    pub fn new(engine: Arc<dyn CopierEngine>, cache_config: CacheConfig, clock: SharedClock) -> Self {
        let cache = Arc::new(ProfileCache::new(cache_config, clock.clone()));
        Self {
            engine,
            cache,
            clock,
        }
    }

    /// Build the full tree for `root` from one streamed enumeration.
    ///
    /// `on_progress` receives the running line count every
    /// `SCAN_PROGRESS_EVERY` lines so long scans stay observable.
    pub fn build_tree(
        &self,
        root: &str,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(u64),
    ) -> Result<DirectoryTree> {
        let canonical_root = paths::normalize(root);
        let mut tree = DirectoryTree::new(&canonical_root);
        let stream = self.engine.list(&canonical_root, cancel)?;

        let mut lines: u64 = 0;
        for line in stream {
            if cancel.is_cancelled() {
                return Err(ConvoyError::Cancelled);
            }
            let line =
                line.map_err(|e| ConvoyError::Copier(format!("list stream failed: {}", e)))?;

            match parse_list_line(&line) {
                Some(ListEntry::File { size, path }) => {
                    let full = if paths::is_absolute(&path) {
                        paths::normalize(&path)
                    } else {
                        paths::join(&canonical_root, &path)
                    };
                    let dir = paths::parent(&full).unwrap_or_else(|| canonical_root.clone());
                    tree.record_file(&dir, size)?;
                }
                Some(ListEntry::Dir { path }) => {
                    let full = if paths::is_absolute(&path) {
                        paths::normalize(&path)
                    } else {
                        paths::join(&canonical_root, &path)
                    };
                    tree.ensure_dir(&full)?;
                }
                None => {}
            }

            lines += 1;
            if lines % SCAN_PROGRESS_EVERY == 0 {
                on_progress(lines);
            }
        }

        on_progress(lines);
        tree.aggregate();
        debug!(
            root = %canonical_root,
            dirs = tree.dir_count(),
            files = tree.root().total_files,
            bytes = tree.root().total_size,
            "enumeration complete"
        );
        Ok(tree)
    }

    /// Cached profile lookup; a miss triggers a fresh enumeration.
    ///
    /// Enumeration failure yields an unsuccessful profile rather than an
    /// error so callers can tell an empty directory from a broken one.
    pub fn get_profile(&self, path: &str, cancel: &CancelToken) -> DirectoryProfile {
        if let Some(profile) = self.cache.get(path) {
            return profile;
        }

        let profile = self.profile_uncached(path, cancel);
        if profile.success {
            self.cache.insert(profile.clone());
        }
        profile
    }

    fn profile_uncached(&self, path: &str, cancel: &CancelToken) -> DirectoryProfile {
        match self.build_tree(path, cancel, &mut |_| {}) {
            Ok(tree) => DirectoryProfile::from_tree(&tree, &self.clock),
            Err(e) => {
                warn!(path, error = %e, "profile enumeration failed");
                DirectoryProfile::failed(path, e.to_string(), &self.clock)
            }
        }
    }

    /// Profile many roots, spreading work over up to `parallelism` threads.
    /// Fewer than three roots are handled inline.
    pub fn build_profiles(
        &self,
        roots: &[String],
        parallelism: usize,
        cancel: &CancelToken,
    ) -> HashMap<String, DirectoryProfile> {
        if roots.len() < PARALLEL_THRESHOLD || parallelism <= 1 {
            return roots
                .iter()
                .map(|root| (paths::normalize(root), self.get_profile(root, cancel)))
                .collect();
        }

        let (work_tx, work_rx) = unbounded::<String>();
        let (result_tx, result_rx) = unbounded::<(String, DirectoryProfile)>();
        for root in roots {
            work_tx.send(root.clone()).expect("work channel open");
        }
        drop(work_tx);

        let workers = parallelism.min(roots.len());
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let profiler = self.clone();
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            handles.push(thread::spawn(move || {
                while let Ok(root) = work_rx.recv() {
                    let profile = profiler.get_profile(&root, &cancel);
                    if result_tx
                        .send((paths::normalize(&root), profile))
                        .is_err()
                    {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut results = HashMap::with_capacity(roots.len());
        while let Ok((root, profile)) = result_rx.recv() {
            results.insert(root, profile);
        }
        for handle in handles {
            let _ = handle.join();
        }
        results
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
