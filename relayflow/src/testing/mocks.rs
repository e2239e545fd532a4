//! Mock worker stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::fixtures::fill_sample;
use crate::context::{ExecutionState, StateField};
use crate::errors::StageError;
use crate::stages::WorkerStage;

/// A stage that fails a scripted number of times, then writes sample values
/// for its fields.
#[derive(Debug)]
pub struct ScriptedStage {
    name: String,
    fields: Vec<StateField>,
    failures: Mutex<VecDeque<StageError>>,
    delay: Option<Duration>,
    stall: Mutex<Option<Duration>>,
    entry_allowed: AtomicBool,
    calls: AtomicUsize,
    cleanups: AtomicUsize,
}

impl ScriptedStage {
    /// Creates a stage writing the standard field for `name`, if any.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let fields = StateField::for_standard_stage(&name).into_iter().collect();
        Self {
            name,
            fields,
            failures: Mutex::new(VecDeque::new()),
            delay: None,
            stall: Mutex::new(None),
            entry_allowed: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
        }
    }

    /// Replaces the written fields.
    #[must_use]
    pub fn producing(mut self, fields: Vec<StateField>) -> Self {
        self.fields = fields;
        self
    }

    /// Fails the next `times` calls with `error`.
    #[must_use]
    pub fn failing_times(self, times: usize, error: StageError) -> Self {
        {
            let mut failures = self.failures.lock();
            for _ in 0..times {
                failures.push_back(error.clone());
            }
        }
        self
    }

    /// Sleeps before every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleeps for `delay` on the first call only.
    #[must_use]
    pub fn stall_first_call(self, delay: Duration) -> Self {
        *self.stall.lock() = Some(delay);
        self
    }

    /// Makes `check_entry_conditions` return false.
    #[must_use]
    pub fn deny_entry(self) -> Self {
        self.entry_allowed.store(false, Ordering::SeqCst);
        self
    }

    /// Number of `execute` calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of `cleanup` calls.
    #[must_use]
    pub fn cleanup_count(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerStage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        state: &mut ExecutionState,
        _run_id: &str,
        _stream_updates: bool,
    ) -> Result<(), StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stall = self.stall.lock().take();
        if let Some(delay) = stall.or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        for field in &self.fields {
            fill_sample(state, *field);
        }
        Ok(())
    }

    async fn check_entry_conditions(&self, _state: &ExecutionState, _run_id: &str) -> bool {
        self.entry_allowed.load(Ordering::SeqCst)
    }

    async fn cleanup(&self, _state: &ExecutionState, _run_id: &str) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

/// A stage that always fails.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: StageError,
    calls: AtomicUsize,
}

impl FailingStage {
    /// Creates a stage failing with a transient error.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: StageError::transient(error),
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a stage failing with a permanent error.
    #[must_use]
    pub fn permanent(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: StageError::permanent(error),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `execute` calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerStage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _state: &mut ExecutionState,
        _run_id: &str,
        _stream_updates: bool,
    ) -> Result<(), StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// A stage that sleeps and then does nothing.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
}

impl SlowStage {
    /// Creates a new slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl WorkerStage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _state: &mut ExecutionState,
        _run_id: &str,
        _stream_updates: bool,
    ) -> Result<(), StageError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// A stage that records a copy of every state it was handed.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    seen: Mutex<Vec<ExecutionState>>,
}

impl RecordingStage {
    /// Creates a new recording stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Returns the recorded states.
    #[must_use]
    pub fn seen(&self) -> Vec<ExecutionState> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl WorkerStage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        state: &mut ExecutionState,
        _run_id: &str,
        _stream_updates: bool,
    ) -> Result<(), StageError> {
        self.seen.lock().push(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_state;

    #[tokio::test]
    async fn test_scripted_stage_fails_then_succeeds() {
        let stage = ScriptedStage::new("data").failing_times(1, StageError::transient("blip"));
        let mut state = test_state("r");

        assert!(stage.execute(&mut state, "r", false).await.is_err());
        assert!(state.data_result.is_none());
        stage.execute(&mut state, "r", false).await.unwrap();
        assert!(state.data_result.is_some());
        assert_eq!(stage.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_stage_counts_calls() {
        let stage = FailingStage::permanent("optimization", "bad input");
        let err = stage.execute(&mut test_state("r"), "r", false).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(stage.call_count(), 1);
    }
}
