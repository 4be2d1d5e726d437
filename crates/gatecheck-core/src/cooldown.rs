//! Per-identity de-duplication of scan log events.
//!
//! A recognized name is logged at most once per cooldown window. The check
//! and the timestamp update happen under one lock, so concurrent scans of
//! the same person cannot both be classified as new.

use crate::types::{STALE_RECORD_NAME, UNKNOWN_NAME};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default suppression window (five minutes).
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Outcome of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingDecision {
    /// New event; the timestamp was recorded.
    Log,
    /// Same name logged within the window.
    Suppress { remaining: Duration },
    /// Excluded pseudo-identity: never recorded, never suppressed.
    Bypass,
}

impl LoggingDecision {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, LoggingDecision::Suppress { .. })
    }
}

/// Process-wide map of display name → last logged instant.
///
/// Entries are never evicted.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    excluded: HashSet<String>,
    last_logged: Mutex<HashMap<String, Instant>>,
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            excluded: [UNKNOWN_NAME, STALE_RECORD_NAME]
                .into_iter()
                .map(String::from)
                .collect(),
            last_logged: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the excluded-name set.
    pub fn with_excluded<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(name)
    }

    /// Decide whether a scan of `name` at `now` is a new log event.
    pub fn should_log(&self, name: &str, now: Instant) -> LoggingDecision {
        if self.is_excluded(name) {
            return LoggingDecision::Bypass;
        }

        let mut map = self.lock();
        if let Some(&last) = map.get(name) {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.window {
                return LoggingDecision::Suppress {
                    remaining: self.window - elapsed,
                };
            }
        }
        map.insert(name.to_string(), now);
        LoggingDecision::Log
    }

    pub fn last_logged(&self, name: &str) -> Option<Instant> {
        self.lock().get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A poisoned lock only means another scan panicked mid-request; the map
    // itself is always left consistent by `should_log`.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.last_logged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_scenario_d_log_suppress_log() {
        let tracker = CooldownTracker::default();
        let t0 = Instant::now();

        assert_eq!(tracker.should_log("Harvey Dent", t0), LoggingDecision::Log);
        assert_eq!(
            tracker.should_log("Harvey Dent", t0 + secs(100)),
            LoggingDecision::Suppress { remaining: secs(200) }
        );
        assert_eq!(
            tracker.should_log("Harvey Dent", t0 + secs(301)),
            LoggingDecision::Log
        );
        assert_eq!(tracker.last_logged("Harvey Dent"), Some(t0 + secs(301)));
    }

    #[test]
    fn test_suppress_does_not_extend_window() {
        let tracker = CooldownTracker::new(secs(300));
        let t0 = Instant::now();
        tracker.should_log("a", t0);
        assert!(tracker.should_log("a", t0 + secs(299)).is_suppressed());
        // Window is measured from the last Log, not the last scan.
        assert_eq!(tracker.should_log("a", t0 + secs(300)), LoggingDecision::Log);
    }

    #[test]
    fn test_names_are_independent() {
        let tracker = CooldownTracker::default();
        let t0 = Instant::now();
        assert_eq!(tracker.should_log("a", t0), LoggingDecision::Log);
        assert_eq!(tracker.should_log("b", t0), LoggingDecision::Log);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_excluded_names_bypass_and_are_never_recorded() {
        let tracker = CooldownTracker::default();
        let t0 = Instant::now();
        for i in 0..5 {
            assert_eq!(tracker.should_log("Unknown", t0 + secs(i)), LoggingDecision::Bypass);
            assert_eq!(
                tracker.should_log("Stale Record", t0 + secs(i)),
                LoggingDecision::Bypass
            );
        }
        assert!(tracker.is_empty());
        assert_eq!(tracker.last_logged("Unknown"), None);
    }

    #[test]
    fn test_custom_excluded_set() {
        let tracker = CooldownTracker::default().with_excluded(["Visitor"]);
        let t0 = Instant::now();
        assert_eq!(tracker.should_log("Visitor", t0), LoggingDecision::Bypass);
        assert_eq!(tracker.should_log("Unknown", t0), LoggingDecision::Log);
    }

    #[test]
    fn test_clock_going_backwards_suppresses() {
        let tracker = CooldownTracker::default();
        let t0 = Instant::now() + secs(10);
        tracker.should_log("a", t0);
        assert!(tracker.should_log("a", t0 - secs(5)).is_suppressed());
    }

    #[test]
    fn test_concurrent_scans_log_exactly_once() {
        const THREADS: usize = 16;
        let tracker = CooldownTracker::default();
        let barrier = Barrier::new(THREADS);
        let now = Instant::now();

        let decisions: Vec<LoggingDecision> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        tracker.should_log("Harvey Dent", now)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let logs = decisions
            .iter()
            .filter(|d| **d == LoggingDecision::Log)
            .count();
        let suppressed = decisions.iter().filter(|d| d.is_suppressed()).count();
        assert_eq!(logs, 1);
        assert_eq!(suppressed, THREADS - 1);
    }
}
