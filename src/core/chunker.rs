/*!
 * Chunk model and tree decomposition
 *
 * A chunk is the atomic unit handed to the copier: one source directory,
 * its mapped destination, and whether the copy is recursive or single-level.
 * Decomposition walks the profiled tree depth-first, splitting oversized
 * subtrees until every chunk fits the configured thresholds, and emits a
 * files-only chunk wherever a split level keeps direct files of its own.
 */

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ChunkLimits;
use crate::core::paths;
use crate::core::tree::DirectoryTree;
use crate::error::Result;

/// Scheduling state of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Skipped,
    Warning,
}

/// One unit of replication work
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Process-unique, monotonically increasing
    pub id: u64,
    pub source: String,
    pub destination: String,
    pub estimated_size: u64,
    pub estimated_files: u64,
    /// Levels below the profile root at which this chunk was emitted
    pub depth: u32,
    /// Copy only the files at this level, not descendants
    pub files_only: bool,
    pub status: ChunkStatus,
    pub retry_count: u32,
    /// Earliest instant the next attempt may start
    pub retry_after: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
    pub last_error: Option<String>,
    /// Opaque extra flags forwarded to the copier
    pub copier_args: Vec<String>,
    /// Per-chunk log file
    pub log_path: Option<PathBuf>,
}

impl Chunk {
    /// Identity used by the checkpoint to recognize a re-emitted chunk
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            paths::normalize(&self.source).to_lowercase(),
            paths::normalize(&self.destination).to_lowercase(),
            if self.files_only { "files" } else { "tree" }
        )
    }
}

/// Atomic id source; one allocator per run keeps ids unique and ordered
#[derive(Debug, Default)]
pub struct ChunkIdAllocator {
    next: AtomicU64,
}

impl ChunkIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Decompose a profiled tree into chunks honoring `limits`.
///
/// Emission order is deterministic: depth-first over the tree in enumeration
/// order, with a level's files-only chunk following its subtree chunks.
pub fn chunk_tree(
    tree: &DirectoryTree,
    src_root: &str,
    dst_root: &str,
    limits: &ChunkLimits,
    ids: &ChunkIdAllocator,
) -> Result<Vec<Chunk>> {
    limits.validate()?;

    let mut chunks = Vec::new();
    walk(
        tree,
        tree.root_index(),
        0,
        src_root,
        dst_root,
        limits,
        ids,
        &mut chunks,
    )?;
    Ok(chunks)
}

#[allow(clippy::too_many_arguments)]
fn walk(
    tree: &DirectoryTree,
    idx: usize,
    depth: u32,
    src_root: &str,
    dst_root: &str,
    limits: &ChunkLimits,
    ids: &ChunkIdAllocator,
    chunks: &mut Vec<Chunk>,
) -> Result<()> {
    let node = tree.node(idx);

    let fits = node.total_size <= limits.max_size_bytes && node.total_files <= limits.max_files;
    if fits {
        chunks.push(directory_chunk(node.path.as_str(), node.total_size, node.total_files, depth, src_root, dst_root, ids)?);
        return Ok(());
    }

    // The depth limit is checked before the small-subtree and leaf cases so
    // an over-threshold node at the boundary is always reported
    if limits.max_depth >= 0 && depth >= limits.max_depth as u32 {
        warn!(
            path = %node.path,
            size = node.total_size,
            files = node.total_files,
            depth,
            "depth limit reached; emitting oversized chunk"
        );
        chunks.push(directory_chunk(node.path.as_str(), node.total_size, node.total_files, depth, src_root, dst_root, ids)?);
        return Ok(());
    }

    if node.total_size < limits.min_size_bytes {
        chunks.push(directory_chunk(node.path.as_str(), node.total_size, node.total_files, depth, src_root, dst_root, ids)?);
        return Ok(());
    }

    if !node.has_children() {
        chunks.push(directory_chunk(node.path.as_str(), node.total_size, node.total_files, depth, src_root, dst_root, ids)?);
        return Ok(());
    }

    for &child in node.child_indices() {
        walk(tree, child, depth + 1, src_root, dst_root, limits, ids, chunks)?;
    }

    if node.direct_files > 0 {
        let destination = paths::map_to_destination(&node.path, src_root, dst_root)?;
        chunks.push(Chunk {
            id: ids.allocate(),
            source: node.path.clone(),
            destination,
            estimated_size: node.direct_size,
            estimated_files: node.direct_files,
            depth,
            files_only: true,
            status: ChunkStatus::Pending,
            retry_count: 0,
            retry_after: None,
            last_exit_code: None,
            last_error: None,
            copier_args: Vec::new(),
            log_path: None,
        });
    }

    Ok(())
}

fn directory_chunk(
    source: &str,
    size: u64,
    files: u64,
    depth: u32,
    src_root: &str,
    dst_root: &str,
    ids: &ChunkIdAllocator,
) -> Result<Chunk> {
    let destination = paths::map_to_destination(source, src_root, dst_root)?;
    Ok(Chunk {
        id: ids.allocate(),
        source: source.to_string(),
        destination,
        estimated_size: size,
        estimated_files: files,
        depth,
        files_only: false,
        status: ChunkStatus::Pending,
        retry_count: 0,
        retry_after: None,
        last_exit_code: None,
        last_error: None,
        copier_args: Vec::new(),
        log_path: None,
    })
}
