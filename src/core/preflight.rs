/*!
 * Pre-flight checks
 *
 * Run once per profile before any chunk is admitted: the source must be
 * reachable and the destination disk must have room for the estimated
 * transfer plus a safety margin. A failed pre-flight marks the profile
 * failed without touching the other profiles.
 */

use std::path::Path;

use sysinfo::Disks;
use tracing::debug;

use crate::error::{ConvoyError, Result};

/// Safety margin kept on top of the estimated transfer size
const DEFAULT_SAFETY_MARGIN_PERCENT: f64 = 0.10;

/// Free space always left untouched (100 MB)
const MIN_FREE_SPACE_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct PreflightConfig {
    pub safety_margin_percent: f64,
    pub min_free_space: u64,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            safety_margin_percent: DEFAULT_SAFETY_MARGIN_PERCENT,
            min_free_space: MIN_FREE_SPACE_BYTES,
        }
    }
}

/// The source root must exist before scanning starts
pub fn check_source_reachable(source: &str) -> Result<()> {
    if Path::new(source).exists() {
        Ok(())
    } else {
        Err(ConvoyError::SourceUnreachable(source.to_string()))
    }
}

/// Validate destination capacity against the estimated transfer size.
///
/// Network destinations that no local disk claims are skipped; the copier
/// itself is the authority there.
pub fn ensure_destination_capacity(
    destination: &str,
    required_bytes: u64,
    config: &PreflightConfig,
) -> Result<()> {
    let disks = Disks::new_with_refreshed_list();
    let dest_path = Path::new(destination);

    let destination_disk = disks
        .iter()
        .filter(|disk| dest_path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());

    let Some(disk) = destination_disk else {
        debug!(destination, "no local disk claims destination; skipping capacity check");
        return Ok(());
    };

    let available = disk.available_space();
    let safety = (required_bytes as f64 * config.safety_margin_percent) as u64;
    let needed = required_bytes + safety + config.min_free_space;

    if available < needed {
        return Err(ConvoyError::InsufficientDiskSpace {
            required: needed,
            available,
        });
    }
    Ok(())
}
