use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Per-process map of last successful presence write per user id, used to
/// suppress redundant store writes under one-call-per-request load.
///
/// Entries are local to this process; each process throttles on its own. A
/// race between two requests for the same id may cost one extra store write
/// inside the window, which the store's last-writer-wins semantics absorb.
pub struct ThrottleMap {
    last_write: Mutex<HashMap<String, Instant>>,
    window: Duration,
}

impl ThrottleMap {
    pub fn new(window: Duration) -> Self {
        Self {
            last_write: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Whether a write for `uid` happened inside the window. A zero window
    /// never throttles.
    pub fn is_throttled(&self, uid: &str) -> bool {
        if self.window.is_zero() {
            return false;
        }
        let guard = self.last_write.lock();
        match guard.get(uid) {
            Some(&at) => at.elapsed() < self.window,
            None => false,
        }
    }

    /// Record a successful write. Only called after the store accepted it, so
    /// a failed write never suppresses the retry.
    pub fn mark_written(&self, uid: &str) {
        self.last_write.lock().insert(uid.to_string(), Instant::now());
    }

    /// Forget `uid` so the next track writes immediately.
    pub fn clear(&self, uid: &str) {
        self.last_write.lock().remove(uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_within_window() {
        let throttle = ThrottleMap::new(Duration::from_secs(30));
        assert!(!throttle.is_throttled("1"));
        throttle.mark_written("1");
        assert!(throttle.is_throttled("1"));
        assert!(!throttle.is_throttled("2"));
    }

    #[test]
    fn window_elapses() {
        let throttle = ThrottleMap::new(Duration::from_millis(10));
        throttle.mark_written("1");
        std::thread::sleep(Duration::from_millis(20));
        assert!(!throttle.is_throttled("1"));
    }

    #[test]
    fn clear_unthrottles() {
        let throttle = ThrottleMap::new(Duration::from_secs(30));
        throttle.mark_written("1");
        throttle.clear("1");
        assert!(!throttle.is_throttled("1"));
    }

    #[test]
    fn zero_window_disables() {
        let throttle = ThrottleMap::new(Duration::ZERO);
        throttle.mark_written("1");
        assert!(!throttle.is_throttled("1"));
    }
}
