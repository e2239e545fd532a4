//! Failure isolation and retry for worker stages.

mod circuit_breaker;
mod clock;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRecord, CircuitBreakerRegistry,
    CircuitState,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use retry::{
    BackoffStrategy, JitterStrategy, NoOpRetryObserver, RetryBudget, RetryConfig, RetryObserver,
    RetryPolicy, RetryScope,
};
