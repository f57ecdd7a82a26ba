/*!
 * Run-scoped cancellation token
 *
 * A single token is created per orchestration run and handed to every
 * worker, snapshot operation, and copier subprocess monitor. Waiting is
 * condvar-based so sleeps end immediately on cancellation instead of
 * polling.
 */

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Cloneable cancellation signal
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

struct TokenState {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState {
                cancelled: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Signal cancellation and wake every waiter
    pub fn cancel(&self) {
        let mut cancelled = self.state.cancelled.lock().unwrap();
        *cancelled = true;
        self.state.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.cancelled.lock().unwrap()
    }

    /// Sleep for up to `timeout`, returning early if cancelled.
    ///
    /// Returns `true` if the token was cancelled before the timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (cancelled, result) = self
            .state
            .condvar
            .wait_timeout_while(
                self.state.cancelled.lock().unwrap(),
                timeout,
                |cancelled| !*cancelled,
            )
            .unwrap();
        *cancelled || !result.timed_out()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_starts_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_visible_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_wait_timeout_elapses() {
        let token = CancelToken::new();
        let start = Instant::now();
        let cancelled = token.wait_timeout(Duration::from_millis(30));
        assert!(!cancelled);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_wakes_on_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();

        let handle = thread::spawn(move || {
            let start = Instant::now();
            let cancelled = waiter.wait_timeout(Duration::from_secs(10));
            (cancelled, start.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        let (cancelled, elapsed) = handle.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }
}
