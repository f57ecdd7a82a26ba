/*!
 * Progress aggregation and ETA math
 *
 * Completed-chunk bytes are accumulated incrementally by the tick loop;
 * live bytes from active jobs are summed on top, so the aggregate stays
 * O(active jobs) per tick. ETA is deliberately conservative: any input that
 * would produce a meaningless figure yields None rather than a wild number.
 */

use chrono::Duration;

/// Longest ETA reported before the estimate is considered meaningless
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtaEstimate {
    pub seconds: i64,
    /// True when the raw estimate exceeded the ceiling and was clamped
    pub capped: bool,
}

/// Estimate seconds remaining.
///
/// Returns None when elapsed is under a millisecond, nothing has been
/// copied, the total is unknown, throughput is under one byte per second,
/// or the arithmetic degenerates (NaN/infinity).
pub fn estimate_eta(
    bytes_complete: u64,
    total_bytes: u64,
    elapsed: Duration,
    max_eta_days: i64,
) -> Option<EtaEstimate> {
    if elapsed < Duration::milliseconds(1) || bytes_complete == 0 || total_bytes == 0 {
        return None;
    }

    let elapsed_secs = elapsed.num_milliseconds() as f64 / 1_000.0;
    let bps = bytes_complete as f64 / elapsed_secs;
    if !bps.is_finite() || bps < 1.0 {
        return None;
    }

    let remaining = total_bytes.saturating_sub(bytes_complete);
    let eta_secs = remaining as f64 / bps;
    if !eta_secs.is_finite() {
        return None;
    }

    let cap_secs = max_eta_days.saturating_mul(86_400);
    if eta_secs > cap_secs as f64 {
        return Some(EtaEstimate {
            seconds: cap_secs,
            capped: true,
        });
    }

    Some(EtaEstimate {
        seconds: eta_secs.round() as i64,
        capped: false,
    })
}

/// Percentage clamped to [0, 100]; absorbs races where completed counts
/// momentarily overtake totals.
pub fn clamp_pct(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = done as f64 / total as f64 * 100.0;
    pct.clamp(0.0, 100.0)
}
