//! System seams for Convoy
//!
//! This module provides the injectable wall-clock used by retry scheduling,
//! ETA computation, and freshness checks:
//! - `SystemClock`: real time for production
//! - `ManualClock`: settable time for tests (in tests module)

mod clock;

pub use clock::{Clock, SharedClock, SystemClock};

#[cfg(test)]
pub use clock::ManualClock;
