//! Durable state store collaborator.

use crate::context::ExecutionState;
use async_trait::async_trait;
use dashmap::DashMap;

/// Durable storage for execution state and thread context.
///
/// Storage format is the implementation's concern. Failures are reported
/// as `false`/`None`, never as panics.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the latest saved state for a run.
    async fn load_state(&self, run_id: &str) -> Option<ExecutionState>;

    /// Saves a state. Returns false on failure.
    async fn save_state(
        &self,
        run_id: &str,
        thread_id: &str,
        user_id: &str,
        state: &ExecutionState,
    ) -> bool;

    /// Loads the conversation context for a thread.
    async fn load_thread_context(&self, thread_id: &str) -> Option<serde_json::Value>;
}

/// A [`StateStore`] held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: DashMap<String, ExecutionState>,
    thread_contexts: DashMap<String, serde_json::Value>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the context returned for a thread.
    pub fn set_thread_context(&self, thread_id: impl Into<String>, context: serde_json::Value) {
        self.thread_contexts.insert(thread_id.into(), context);
    }

    /// Removes the saved state for a run.
    pub fn remove_state(&self, run_id: &str) {
        self.states.remove(run_id);
    }

    /// Returns the number of saved runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns true if nothing was saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load_state(&self, run_id: &str) -> Option<ExecutionState> {
        self.states.get(run_id).map(|s| s.value().clone())
    }

    async fn save_state(
        &self,
        run_id: &str,
        _thread_id: &str,
        _user_id: &str,
        state: &ExecutionState,
    ) -> bool {
        self.states.insert(run_id.to_string(), state.clone());
        true
    }

    async fn load_thread_context(&self, thread_id: &str) -> Option<serde_json::Value> {
        self.thread_contexts.get(thread_id).map(|c| c.value().clone())
    }
}
