//! Worker stage trait and implementations.
//!
//! Stages are the units of work in a relayflow pipeline. Each stage reads the
//! execution state and writes the fields it owns.

mod registry;

pub use registry::StageRegistry;

use crate::context::ExecutionState;
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for worker stages.
#[async_trait]
pub trait WorkerStage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes the stage against a private copy of the state.
    ///
    /// Only the fields the stage owns are taken back by the orchestrator.
    async fn execute(
        &self,
        state: &mut ExecutionState,
        run_id: &str,
        stream_updates: bool,
    ) -> Result<(), StageError>;

    /// Returns false to skip the stage for this state.
    async fn check_entry_conditions(&self, _state: &ExecutionState, _run_id: &str) -> bool {
        true
    }

    /// Releases stage resources after an unrecovered failure or cancellation.
    async fn cleanup(&self, _state: &ExecutionState, _run_id: &str) {}
}

/// A synchronous function-based stage.
pub struct FnStage<F>
where
    F: Fn(&mut ExecutionState) -> anyhow::Result<()> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&mut ExecutionState) -> anyhow::Result<()> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&mut ExecutionState) -> anyhow::Result<()> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> WorkerStage for FnStage<F>
where
    F: Fn(&mut ExecutionState) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        state: &mut ExecutionState,
        _run_id: &str,
        _stream_updates: bool,
    ) -> Result<(), StageError> {
        (self.func)(state).map_err(StageError::from)
    }
}

/// An async function-based stage.
///
/// The closure receives an owned copy of the state and returns the updated one.
pub struct AsyncFnStage<F, Fut>
where
    F: Fn(ExecutionState) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ExecutionState>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStage<F, Fut>
where
    F: Fn(ExecutionState) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ExecutionState>> + Send,
{
    /// Creates a new async function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnStage<F, Fut>
where
    F: Fn(ExecutionState) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ExecutionState>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> WorkerStage for AsyncFnStage<F, Fut>
where
    F: Fn(ExecutionState) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ExecutionState>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        state: &mut ExecutionState,
        _run_id: &str,
        _stream_updates: bool,
    ) -> Result<(), StageError> {
        *state = (self.func)(state.clone()).await.map_err(StageError::from)?;
        Ok(())
    }
}

/// A stage that does nothing.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl WorkerStage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _state: &mut ExecutionState,
        _run_id: &str,
        _stream_updates: bool,
    ) -> Result<(), StageError> {
        Ok(())
    }
}
