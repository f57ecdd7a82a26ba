//! Injectable wall clock
//!
//! Every component that schedules (retry-after, backoff), ages (cache
//! freshness, health staleness), or measures (ETA) goes through this trait so
//! tests can advance time without sleeping.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle passed down through the runtime context
pub type SharedClock = Arc<dyn Clock>;

/// Real system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests
#[cfg(test)]
pub use manual::ManualClock;
