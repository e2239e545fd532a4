//! Per-invocation stage context and the bounded execution history.

use super::ExecutionState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of entries kept by [`ExecutionHistory`].
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Context for one stage invocation, including its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageExecutionContext {
    /// Stage being executed.
    pub stage_name: String,
    /// Run ID.
    pub run_id: String,
    /// User ID.
    pub user_id: String,
    /// Thread ID.
    pub thread_id: String,
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
    /// When the invocation finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message if it failed.
    pub error: Option<String>,
    /// Retries performed so far.
    pub retry_count: u32,
    /// Retry limit for the stage.
    pub max_retries: u32,
    /// Wall time of the whole invocation.
    pub duration_ms: Option<f64>,
}

impl StageExecutionContext {
    /// Creates a context for a stage invocation.
    #[must_use]
    pub fn new(
        stage_name: impl Into<String>,
        run_id: impl Into<String>,
        user_id: impl Into<String>,
        thread_id: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            run_id: run_id.into(),
            user_id: user_id.into(),
            thread_id: thread_id.into(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            retry_count: 0,
            max_retries,
            duration_ms: None,
        }
    }

    /// Creates a context from the state the stage will run against.
    #[must_use]
    pub fn for_state(stage_name: impl Into<String>, state: &ExecutionState, max_retries: u32) -> Self {
        Self::new(
            stage_name,
            state.run_id.clone(),
            state.user_id.clone(),
            state.thread_id.clone(),
            max_retries,
        )
    }

    /// Marks the invocation as completed.
    pub fn mark_completed(&mut self, duration_ms: f64) {
        self.completed_at = Some(Utc::now());
        self.duration_ms = Some(duration_ms);
    }

    /// Marks the invocation as failed.
    pub fn mark_failed(&mut self, error: impl Into<String>, duration_ms: f64) {
        self.completed_at = Some(Utc::now());
        self.duration_ms = Some(duration_ms);
        self.error = Some(error.into());
    }

    /// Returns true if the invocation finished without error.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.completed_at.is_some() && self.error.is_none()
    }
}

/// Bounded ring buffer of finished stage contexts.
#[derive(Debug)]
pub struct ExecutionHistory {
    capacity: usize,
    entries: Mutex<VecDeque<StageExecutionContext>>,
}

impl ExecutionHistory {
    /// Creates a history holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends an entry, evicting the oldest when full.
    pub fn record(&self, ctx: StageExecutionContext) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(ctx);
    }

    /// Returns every entry, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<StageExecutionContext> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Returns the entries for one run, oldest first.
    #[must_use]
    pub fn for_run(&self, run_id: &str) -> Vec<StageExecutionContext> {
        self.entries
            .lock()
            .iter()
            .filter(|c| c.run_id == run_id)
            .cloned()
            .collect()
    }

    /// Returns the latest entry for a stage within a run.
    #[must_use]
    pub fn latest(&self, run_id: &str, stage: &str) -> Option<StageExecutionContext> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|c| c.run_id == run_id && c.stage_name == stage)
            .cloned()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
