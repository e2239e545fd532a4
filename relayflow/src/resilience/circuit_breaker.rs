//! Per-stage circuit breaker.
//!
//! A breaker isolates a persistently failing stage. It is shared by every
//! session that runs the stage and is updated under its own mutex, so
//! concurrent sessions see one consistent failure history.

use super::clock::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    #[default]
    Closed,
    /// Calls are refused until the recovery timeout elapses.
    Open,
    /// A limited number of probe calls are admitted.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time the breaker stays open before admitting a probe.
    pub recovery_timeout_ms: u64,
    /// Successful probes required to close again.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            half_open_max_probes: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the recovery timeout.
    #[must_use]
    pub fn with_recovery_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.recovery_timeout_ms = timeout_ms;
        self
    }

    /// Sets the number of probes needed to close.
    #[must_use]
    pub fn with_half_open_max_probes(mut self, probes: u32) -> Self {
        self.half_open_max_probes = probes;
        self
    }

    /// Returns the recovery timeout as a duration.
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

/// Point-in-time view of a breaker, including lifetime metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerRecord {
    /// Stage guarded by the breaker.
    pub stage: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    /// Wall-clock time of the last failure.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Successful probes in the current half-open window.
    pub half_open_probe_count: u32,
    /// Probes admitted in half-open that have not reported back yet.
    pub in_flight_probes: u32,
    /// Configured threshold.
    pub failure_threshold: u32,
    /// Configured recovery timeout.
    pub recovery_timeout_ms: u64,
    /// Configured probe count.
    pub half_open_max_probes: u32,
    /// Failures over the breaker's lifetime.
    pub total_failures: u64,
    /// Successes over the breaker's lifetime.
    pub total_successes: u64,
    /// Number of Closed/HalfOpen -> Open transitions.
    pub times_opened: u64,
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    half_open_probe_count: u32,
    in_flight_probes: u32,
    total_failures: u64,
    total_successes: u64,
    times_opened: u64,
}

/// Failure-isolation state machine for one stage.
#[derive(Debug)]
pub struct CircuitBreaker {
    stage: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a breaker on the system clock.
    #[must_use]
    pub fn new(stage: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(stage, config, Arc::new(SystemClock))
    }

    /// Creates a breaker on an injected clock.
    #[must_use]
    pub fn with_clock(
        stage: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stage: stage.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    /// Returns the guarded stage name.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Returns the breaker config.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state without side effects.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns true if a call may proceed.
    ///
    /// An open breaker whose recovery timeout has elapsed moves to
    /// half-open here and admits the caller as its first probe. Every
    /// admission in half-open holds a probe slot until the caller reports
    /// back through [`record_success`](Self::record_success),
    /// [`record_failure`](Self::record_failure) or
    /// [`release_probe`](Self::release_probe).
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if !self.recovery_elapsed(&inner) {
                    return false;
                }
                inner.state = CircuitState::HalfOpen;
                inner.half_open_probe_count = 0;
                inner.in_flight_probes = 1;
                info!(stage = %self.stage, "Circuit breaker half-open, admitting probe");
                true
            }
            CircuitState::HalfOpen => {
                if self.probe_slot_free(&inner) {
                    inner.in_flight_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Returns true if [`can_execute`](Self::can_execute) would admit a call
    /// right now, without moving state or taking a probe slot.
    #[must_use]
    pub fn would_admit(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.recovery_elapsed(&inner),
            CircuitState::HalfOpen => self.probe_slot_free(&inner),
        }
    }

    /// Frees a probe slot for an admitted call that ended without an
    /// outcome, such as a cancelled attempt.
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.in_flight_probes = inner.in_flight_probes.saturating_sub(1);
        }
    }

    fn recovery_elapsed(&self, inner: &BreakerInner) -> bool {
        let elapsed = inner
            .last_failure_at
            .map_or(Duration::MAX, |at| self.clock.now().saturating_duration_since(at));
        elapsed >= self.config.recovery_timeout()
    }

    fn probe_slot_free(&self, inner: &BreakerInner) -> bool {
        inner.half_open_probe_count + inner.in_flight_probes < self.config.half_open_max_probes
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.in_flight_probes = inner.in_flight_probes.saturating_sub(1);
                inner.half_open_probe_count += 1;
                if inner.half_open_probe_count >= self.config.half_open_max_probes {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.half_open_probe_count = 0;
                    inner.in_flight_probes = 0;
                    info!(stage = %self.stage, "Circuit breaker closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(self.clock.now());
        inner.last_failure_time = Some(Utc::now());

        let should_open = match inner.state {
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if should_open {
            inner.state = CircuitState::Open;
            inner.half_open_probe_count = 0;
            inner.in_flight_probes = 0;
            inner.times_opened += 1;
            warn!(
                stage = %self.stage,
                failure_count = inner.failure_count,
                "Circuit breaker opened"
            );
        }
    }

    /// Returns a snapshot of the breaker record.
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerRecord {
        let inner = self.inner.lock();
        CircuitBreakerRecord {
            stage: self.stage.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_time,
            half_open_probe_count: inner.half_open_probe_count,
            in_flight_probes: inner.in_flight_probes,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_ms: self.config.recovery_timeout_ms,
            half_open_max_probes: self.config.half_open_max_probes,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            times_opened: inner.times_opened,
        }
    }

    /// Returns the breaker to a fresh closed state, clearing metrics.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::default();
    }
}

/// Process-wide map of stage name to breaker.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    clock: Arc<dyn Clock>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry using the system clock.
    #[must_use]
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self::with_clock(default_config, Arc::new(SystemClock))
    }

    /// Creates a registry whose breakers share the given clock.
    #[must_use]
    pub fn with_clock(default_config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
            clock,
            breakers: DashMap::new(),
        }
    }

    /// Sets a per-stage config override.
    #[must_use]
    pub fn with_override(mut self, stage: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(stage.into(), config);
        self
    }

    /// Returns the breaker for a stage, creating it on first use.
    pub fn get(&self, stage: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(stage) {
            return Arc::clone(existing.value());
        }
        let config = self
            .overrides
            .get(stage)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());
        let entry = self.breakers.entry(stage.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::with_clock(stage, config, Arc::clone(&self.clock)))
        });
        Arc::clone(entry.value())
    }

    /// Returns snapshots of every breaker, sorted by stage name.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<CircuitBreakerRecord> {
        let mut records: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        records.sort_by(|a, b| a.stage.cmp(&b.stage));
        records
    }

    /// Resets every breaker.
    pub fn reset_all(&self) {
        for breaker in &self.breakers {
            breaker.value().reset();
        }
    }

    /// Returns the number of breakers created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns true if no breaker has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::ManualClock;

    fn breaker(threshold: u32, probes: u32) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = CircuitBreakerConfig::new()
            .with_failure_threshold(threshold)
            .with_recovery_timeout_ms(1_000)
            .with_half_open_max_probes(probes);
        let cb = CircuitBreaker::with_clock("optimization", config, clock.clone());
        (cb, clock)
    }

    #[test]
    fn test_opens_after_threshold_and_half_opens_after_timeout() {
        let (cb, clock) = breaker(3, 1);

        for _ in 0..3 {
            assert!(cb.can_execute());
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        clock.advance(Duration::from_millis(999));
        assert!(!cb.can_execute());

        clock.advance(Duration::from_millis(1));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_success_in_closed_resets_consecutive_count() {
        let (cb, _clock) = breaker(3, 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 1);
        assert_eq!(snap.total_failures, 3);
        assert_eq!(snap.total_successes, 1);
    }

    #[test]
    fn test_half_open_closes_after_enough_probes() {
        let (cb, clock) = breaker(1, 2);
        cb.record_failure();
        clock.advance(Duration::from_secs(2));

        assert!(cb.can_execute());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_execute());
        cb.record_success();

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.half_open_probe_count, 0);
    }

    #[test]
    fn test_half_open_admits_one_call_until_it_reports() {
        let (cb, clock) = breaker(1, 1);
        cb.record_failure();
        clock.advance(Duration::from_secs(2));

        let admitted = (0..50).filter(|_| cb.can_execute()).count();
        assert_eq!(admitted, 1);
        assert_eq!(cb.snapshot().in_flight_probes, 1);
        assert!(!cb.would_admit());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_half_open_admissions_capped_by_max_probes() {
        let (cb, clock) = breaker(1, 3);
        cb.record_failure();
        clock.advance(Duration::from_secs(2));

        let admitted = (0..10).filter(|_| cb.can_execute()).count();
        assert_eq!(admitted, 3);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_released_slot_is_reusable() {
        let (cb, clock) = breaker(1, 1);
        cb.record_failure();
        clock.advance(Duration::from_secs(2));

        assert!(cb.can_execute());
        assert!(!cb.can_execute());
        cb.release_probe();
        assert!(cb.would_admit());
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_would_admit_does_not_move_state() {
        let (cb, clock) = breaker(1, 1);
        cb.record_failure();
        assert!(!cb.would_admit());

        clock.advance(Duration::from_secs(2));
        assert!(cb.would_admit());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (cb, clock) = breaker(1, 3);
        cb.record_failure();
        clock.advance(Duration::from_secs(2));
        assert!(cb.can_execute());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        assert_eq!(cb.snapshot().times_opened, 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let (cb, _clock) = breaker(1, 1);
        cb.record_failure();
        cb.reset();

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.total_failures, 0);
        assert!(snap.last_failure_time.is_none());
    }

    #[test]
    fn test_registry_shares_breakers_and_applies_overrides() {
        let registry = CircuitBreakerRegistry::default()
            .with_override("data", CircuitBreakerConfig::new().with_failure_threshold(2));

        let a = registry.get("data");
        let b = registry.get("data");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.config().failure_threshold, 2);
        assert_eq!(registry.get("triage").config().failure_threshold, 5);

        a.record_failure();
        let snaps = registry.snapshot_all();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].stage, "data");
        assert_eq!(snaps[0].failure_count, 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }
}
