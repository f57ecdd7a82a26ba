/*!
 * Admission-control circuit breaker
 *
 * Counts consecutive chunks whose retries were exhausted. Past the
 * threshold the breaker trips and the orchestrator stops admitting work
 * until an operator resets it. This is a pure state machine; the tick loop
 * owns the instance and feeds it, so no locking is involved.
 */

use chrono::{DateTime, Utc};

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
    tripped: bool,
    tripped_at: Option<DateTime<Utc>>,
    reason: Option<String>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive_failures: 0,
            tripped: false,
            tripped_at: None,
            reason: None,
        }
    }

    /// Record a terminal chunk failure; returns true when this failure
    /// tripped the breaker.
    pub fn record_failure(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        if self.tripped {
            return false;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold {
            self.tripped = true;
            self.tripped_at = Some(now);
            self.reason = Some(reason.to_string());
            return true;
        }
        false
    }

    /// A successful completion breaks the failure streak
    pub fn record_success(&mut self) {
        if !self.tripped {
            self.consecutive_failures = 0;
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn trip_reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn tripped_at(&self) -> Option<DateTime<Utc>> {
        self.tripped_at
    }

    /// Operator reset: clears the streak and re-arms admission
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.tripped = false;
        self.tripped_at = None;
        self.reason = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_at_threshold() {
        let mut breaker = CircuitBreaker::new(3);
        let now = Utc::now();

        assert!(!breaker.record_failure("chunk 1", now));
        assert!(!breaker.record_failure("chunk 2", now));
        assert!(breaker.record_failure("chunk 3", now));
        assert!(breaker.is_tripped());
        assert_eq!(breaker.trip_reason(), Some("chunk 3"));
    }

    #[test]
    fn test_success_resets_streak() {
        let mut breaker = CircuitBreaker::new(3);
        let now = Utc::now();

        breaker.record_failure("a", now);
        breaker.record_failure("b", now);
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);

        breaker.record_failure("c", now);
        assert!(!breaker.is_tripped());
    }

    #[test]
    fn test_success_does_not_untrip() {
        let mut breaker = CircuitBreaker::new(1);
        let now = Utc::now();

        breaker.record_failure("a", now);
        assert!(breaker.is_tripped());
        breaker.record_success();
        assert!(breaker.is_tripped());
    }

    #[test]
    fn test_reset() {
        let mut breaker = CircuitBreaker::new(1);
        breaker.record_failure("a", Utc::now());
        breaker.reset();

        assert!(!breaker.is_tripped());
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.trip_reason(), None);
    }
}
