//! Liveness tracking for running sessions.

use crate::resilience::{Clock, SystemClock};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Records heartbeats per run and reports runs that went silent.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    clock: Arc<dyn Clock>,
    beats: DashMap<String, Instant>,
}

impl HeartbeatMonitor {
    /// Creates a monitor on the system clock.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_clock(timeout, Arc::new(SystemClock))
    }

    /// Creates a monitor on an injected clock.
    #[must_use]
    pub fn with_clock(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            timeout,
            clock,
            beats: DashMap::new(),
        }
    }

    /// Records a heartbeat.
    pub fn beat(&self, run_id: &str) {
        self.beats.insert(run_id.to_string(), self.clock.now());
    }

    /// Stops tracking a run.
    pub fn remove(&self, run_id: &str) {
        self.beats.remove(run_id);
    }

    /// Returns true if the run beat within the timeout.
    #[must_use]
    pub fn is_alive(&self, run_id: &str) -> bool {
        let now = self.clock.now();
        self.beats
            .get(run_id)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.timeout)
    }

    /// Returns tracked runs whose last beat is older than the timeout.
    #[must_use]
    pub fn stale_runs(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut stale: Vec<String> = self
            .beats
            .iter()
            .filter(|e| now.saturating_duration_since(*e.value()) >= self.timeout)
            .map(|e| e.key().clone())
            .collect();
        stale.sort();
        stale
    }

    /// Number of tracked runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beats.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::ManualClock;

    #[test]
    fn test_runs_go_stale_after_timeout() {
        let clock = Arc::new(ManualClock::new());
        let monitor = HeartbeatMonitor::with_clock(Duration::from_secs(60), clock.clone());

        monitor.beat("a");
        monitor.beat("b");
        clock.advance(Duration::from_secs(30));
        monitor.beat("b");
        clock.advance(Duration::from_secs(30));

        assert_eq!(monitor.stale_runs(), vec!["a".to_string()]);
        assert!(!monitor.is_alive("a"));
        assert!(monitor.is_alive("b"));
        assert!(!monitor.is_alive("never-seen"));

        monitor.remove("a");
        assert!(monitor.stale_runs().is_empty());
        assert_eq!(monitor.len(), 1);
    }
}
