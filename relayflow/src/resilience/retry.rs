//! Bounded retry with backoff, jitter and a session-wide retry budget.
//!
//! Every attempt is gated by the stage's circuit breaker and bounded by
//! the stage timeout. Failed attempts are charged to a [`RetryBudget`]
//! shared by all stages of one session.

use super::circuit_breaker::CircuitBreaker;
use crate::cancellation::CancellationToken;
use crate::context::StageExecutionContext;
use crate::errors::{RelayflowError, StageError};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retries after the first attempt.
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Calculates the delay before retry number `retry` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;

        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(retry)).min(max),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry) + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Session-scoped cap on failed attempts across all stages.
#[derive(Debug)]
pub struct RetryBudget {
    limit: u32,
    charged: AtomicU32,
}

impl RetryBudget {
    /// Creates a budget allowing `limit` failed attempts.
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            charged: AtomicU32::new(0),
        }
    }

    /// Charges one failed attempt. Returns false if already exhausted.
    pub fn charge(&self) -> bool {
        self.charged
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                (c < self.limit).then_some(c + 1)
            })
            .is_ok()
    }

    /// Returns true once the charged total reached the limit.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.charged.load(Ordering::SeqCst) >= self.limit
    }

    /// Failed attempts charged so far.
    #[must_use]
    pub fn charged(&self) -> u32 {
        self.charged.load(Ordering::SeqCst)
    }

    /// Charges left before exhaustion.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.charged())
    }

    /// The configured limit.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

/// Notified before each retry is scheduled.
#[async_trait]
pub trait RetryObserver: Send + Sync {
    /// Called with the stage context (already carrying the new retry
    /// count), the error that triggered the retry and the backoff delay.
    async fn on_retry(&self, ctx: &StageExecutionContext, error: &StageError, delay: Duration);
}

/// Observer that ignores retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpRetryObserver;

#[async_trait]
impl RetryObserver for NoOpRetryObserver {
    async fn on_retry(&self, _ctx: &StageExecutionContext, _error: &StageError, _delay: Duration) {}
}

/// Collaborators a retry loop needs for one stage invocation.
pub struct RetryScope<'a> {
    /// Breaker guarding the stage.
    pub breaker: &'a CircuitBreaker,
    /// Session retry budget.
    pub budget: &'a RetryBudget,
    /// Session cancellation.
    pub cancel: &'a CancellationToken,
    /// Retry observer.
    pub observer: &'a dyn RetryObserver,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

/// Executes stage attempts with bounded retries.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a policy from a config.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the policy config.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out
    /// of retries.
    ///
    /// `operation` receives the 1-based attempt number. `ctx.retry_count`
    /// is updated in place so callers can read it after the call.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &mut StageExecutionContext,
        scope: RetryScope<'_>,
        mut operation: F,
    ) -> Result<T, RelayflowError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let stage = ctx.stage_name.clone();
        let timeout_ms = u64::try_from(scope.timeout.as_millis()).unwrap_or(u64::MAX);
        let mut attempts: u32 = 0;

        loop {
            if scope.cancel.is_cancelled() {
                return Err(RelayflowError::Cancelled(scope.cancel.reason().unwrap_or_default()));
            }
            if !scope.breaker.can_execute() {
                return Err(RelayflowError::BreakerOpen { stage });
            }

            attempts += 1;
            let outcome = tokio::select! {
                biased;
                () = scope.cancel.cancelled() => {
                    Err(StageError::Cancelled(scope.cancel.reason().unwrap_or_default()))
                }
                result = tokio::time::timeout(scope.timeout, operation(attempts)) => {
                    result.unwrap_or(Err(StageError::Timeout(timeout_ms)))
                }
            };

            let error = match outcome {
                Ok(value) => {
                    scope.breaker.record_success();
                    return Ok(value);
                }
                Err(StageError::Cancelled(reason)) => {
                    scope.breaker.release_probe();
                    return Err(RelayflowError::Cancelled(reason));
                }
                Err(error) => error,
            };

            scope.breaker.record_failure();
            if !error.is_retryable() {
                return Err(RelayflowError::StageFailed {
                    stage,
                    source: error,
                });
            }

            scope.budget.charge();
            if ctx.retry_count >= self.config.max_retries || scope.budget.is_exhausted() {
                return Err(RelayflowError::RetryBudgetExhausted {
                    stage,
                    attempts,
                    last_error: error,
                });
            }

            let delay = self.config.delay_for(ctx.retry_count);
            ctx.retry_count += 1;
            debug!(
                stage = %stage,
                retry = ctx.retry_count,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                budget_remaining = scope.budget.remaining(),
                error = %error,
                "Retrying stage after error"
            );
            scope.observer.on_retry(ctx, &error, delay).await;

            tokio::select! {
                biased;
                () = scope.cancel.cancelled() => {
                    return Err(RelayflowError::Cancelled(scope.cancel.reason().unwrap_or_default()));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::new()
                .with_max_retries(max_retries)
                .with_base_delay_ms(1)
                .with_jitter(JitterStrategy::None),
        )
    }

    fn ctx() -> StageExecutionContext {
        StageExecutionContext::new("data", "run-1", "user-1", "thread-1", 3)
    }

    fn scope<'a>(
        breaker: &'a CircuitBreaker,
        budget: &'a RetryBudget,
        cancel: &'a CancellationToken,
    ) -> RetryScope<'a> {
        RetryScope {
            breaker,
            budget,
            cancel,
            observer: &NoOpRetryObserver,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Exponential);
        assert_eq!(config.jitter_strategy, JitterStrategy::Full);
    }

    #[test]
    fn test_delay_exponential_no_jitter() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None);

        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_linear_and_constant() {
        let linear = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None);
        assert_eq!(linear.delay_for(2), Duration::from_millis(300));

        let constant = linear.with_backoff(BackoffStrategy::Constant);
        assert_eq!(constant.delay_for(7), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_capped_and_jittered() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_jitter(JitterStrategy::None);
        assert_eq!(config.delay_for(10), Duration::from_millis(5000));

        let jittered = config.with_jitter(JitterStrategy::Equal);
        for _ in 0..10 {
            let d = jittered.delay_for(0).as_millis();
            assert!((500..=1000).contains(&d));
        }
    }

    #[test]
    fn test_budget_saturates() {
        let budget = RetryBudget::new(2);
        assert!(budget.charge());
        assert!(budget.charge());
        assert!(!budget.charge());
        assert!(budget.is_exhausted());
        assert_eq!(budget.charged(), 2);
        assert_eq!(budget.remaining(), 0);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let breaker = CircuitBreaker::new("data", CircuitBreakerConfig::default());
        let budget = RetryBudget::new(10);
        let cancel = CancellationToken::new();
        let mut ctx = ctx();

        let result = fast_policy(3)
            .execute(&mut ctx, scope(&breaker, &budget, &cancel), |attempt| async move {
                if attempt < 3 {
                    Err(StageError::transient("warehouse busy"))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.ok(), Some(3));
        assert_eq!(ctx.retry_count, 2);
        assert_eq!(budget.charged(), 2);
        assert_eq!(breaker.snapshot().total_failures, 2);
    }

    #[tokio::test]
    async fn test_budget_bounds_total_attempts() {
        let breaker = CircuitBreaker::new("data", CircuitBreakerConfig::default());
        let budget = RetryBudget::new(2);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = ctx();

        let counter = calls.clone();
        let result: Result<(), _> = fast_policy(10)
            .execute(&mut ctx, scope(&breaker, &budget, &cancel), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(StageError::transient("always")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(RelayflowError::RetryBudgetExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let breaker = CircuitBreaker::new("data", CircuitBreakerConfig::default());
        let budget = RetryBudget::new(10);
        let cancel = CancellationToken::new();
        let mut ctx = ctx();

        let result: Result<(), _> = fast_policy(3)
            .execute(&mut ctx, scope(&breaker, &budget, &cancel), |_| async {
                Err(StageError::permanent("schema mismatch"))
            })
            .await;

        assert!(matches!(result, Err(RelayflowError::StageFailed { .. })));
        assert_eq!(ctx.retry_count, 0);
        assert_eq!(budget.charged(), 0);
    }

    #[tokio::test]
    async fn test_open_breaker_blocks_without_attempt() {
        let breaker = CircuitBreaker::new(
            "data",
            CircuitBreakerConfig::new().with_failure_threshold(1),
        );
        breaker.record_failure();
        let budget = RetryBudget::new(10);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = ctx();

        let counter = calls.clone();
        let result: Result<(), _> = fast_policy(3)
            .execute(&mut ctx, scope(&breaker, &budget, &cancel), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(RelayflowError::BreakerOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.retry_count, 0);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("data", CircuitBreakerConfig::default());
        let budget = RetryBudget::new(10);
        let cancel = CancellationToken::new();
        let mut ctx = ctx();

        let mut scope = scope(&breaker, &budget, &cancel);
        scope.timeout = Duration::from_millis(10);
        let result: Result<(), _> = fast_policy(1)
            .execute(&mut ctx, scope, |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        match result {
            Err(RelayflowError::RetryBudgetExhausted { last_error, attempts, .. }) => {
                assert_eq!(last_error, StageError::Timeout(10));
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let breaker = CircuitBreaker::new("data", CircuitBreakerConfig::default());
        let budget = RetryBudget::new(10);
        let cancel = Arc::new(CancellationToken::new());
        let mut ctx = ctx();
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay_ms(60_000)
                .with_jitter(JitterStrategy::None),
        );

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel("client disconnected");
        });

        let result: Result<(), _> = policy
            .execute(&mut ctx, scope(&breaker, &budget, &cancel), |_| async {
                Err(StageError::transient("flaky"))
            })
            .await;

        match result {
            Err(RelayflowError::Cancelled(reason)) => assert_eq!(reason, "client disconnected"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_attempt_returns_half_open_slot() {
        let clock = Arc::new(crate::resilience::ManualClock::new());
        let breaker = CircuitBreaker::with_clock(
            "data",
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_recovery_timeout_ms(1_000)
                .with_half_open_max_probes(1),
            clock.clone(),
        );
        breaker.record_failure();
        clock.advance(Duration::from_secs(2));
        let budget = RetryBudget::new(10);
        let cancel = Arc::new(CancellationToken::new());
        let mut ctx = ctx();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel("client disconnected");
        });

        let result: Result<(), _> = fast_policy(3)
            .execute(&mut ctx, scope(&breaker, &budget, &cancel), |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(RelayflowError::Cancelled(_))));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.snapshot().in_flight_probes, 0);
        assert!(breaker.can_execute());
    }

    #[tokio::test]
    async fn test_observer_sees_each_retry() {
        struct Recorder(Mutex<Vec<u32>>);

        #[async_trait]
        impl RetryObserver for Recorder {
            async fn on_retry(&self, ctx: &StageExecutionContext, _e: &StageError, _d: Duration) {
                self.0.lock().push(ctx.retry_count);
            }
        }

        let breaker = CircuitBreaker::new("data", CircuitBreakerConfig::default());
        let budget = RetryBudget::new(10);
        let cancel = CancellationToken::new();
        let recorder = Recorder(Mutex::new(Vec::new()));
        let mut ctx = ctx();

        let scope = RetryScope {
            breaker: &breaker,
            budget: &budget,
            cancel: &cancel,
            observer: &recorder,
            timeout: Duration::from_secs(1),
        };
        let _ = fast_policy(2)
            .execute(&mut ctx, scope, |_| async { Err::<(), _>(StageError::transient("x")) })
            .await;

        assert_eq!(*recorder.0.lock(), vec![1, 2]);
    }
}
