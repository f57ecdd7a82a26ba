/*!
 * Bandwidth share derivation
 *
 * The copier throttles with an inter-packet gap: a pause inserted after
 * each 64 KB block. Convoy divides the aggregate limit evenly across the
 * worker pool and converts each worker's share into the gap that holds the
 * block rate at that share.
 */

/// The copier paces in 64 KB blocks
pub const BLOCK_BYTES: u64 = 64 * 1024;

/// Inter-packet gap in milliseconds for one worker's share of the aggregate
/// limit. Zero means unthrottled.
pub fn ipg_for_share(total_bytes_per_sec: u64, workers: usize) -> u64 {
    if total_bytes_per_sec == 0 || workers == 0 {
        return 0;
    }
    let share = (total_bytes_per_sec / workers as u64).max(1);
    // Milliseconds per block at the target share, rounded up so the
    // aggregate never exceeds the configured limit
    (BLOCK_BYTES * 1_000).div_ceil(share)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_is_zero_gap() {
        assert_eq!(ipg_for_share(0, 4), 0);
        assert_eq!(ipg_for_share(10_000_000, 0), 0);
    }

    #[test]
    fn test_even_share() {
        // 10 MiB/s over 4 workers: 2.5 MiB/s each, one block every 25 ms
        let ipg = ipg_for_share(10 * 1024 * 1024, 4);
        assert_eq!(ipg, 25);
    }

    #[test]
    fn test_single_worker_gets_whole_budget() {
        let one = ipg_for_share(1024 * 1024, 1);
        let four = ipg_for_share(1024 * 1024, 4);
        assert!(four > one);
        assert_eq!(one, 64);
    }

    #[test]
    fn test_tiny_share_rounds_up() {
        // 100 bytes/sec must still produce a finite, large gap
        let ipg = ipg_for_share(100, 1);
        assert_eq!(ipg, (BLOCK_BYTES * 1_000).div_ceil(100));
    }
}
