//! Named registry of worker stages.

use super::{AsyncFnStage, FnStage, WorkerStage};
use crate::context::ExecutionState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Maps stage names to implementations.
///
/// Closures are adapted to [`WorkerStage`] here, once, at registration time.
#[derive(Debug, Default)]
pub struct StageRegistry {
    stages: RwLock<HashMap<String, Arc<dyn WorkerStage>>>,
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stage under its own name, replacing any previous one.
    pub fn register(&self, stage: Arc<dyn WorkerStage>) {
        let name = stage.name().to_string();
        self.stages.write().insert(name, stage);
    }

    /// Registers a synchronous closure.
    pub fn register_fn<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&mut ExecutionState) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnStage::new(name, func)));
    }

    /// Registers an async closure.
    pub fn register_async_fn<F, Fut>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(ExecutionState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ExecutionState>> + Send + 'static,
    {
        self.register(Arc::new(AsyncFnStage::new(name, func)));
    }

    /// Looks up a stage.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn WorkerStage>> {
        self.stages.read().get(name).cloned()
    }

    /// Returns true if a stage is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.stages.read().contains_key(name)
    }

    /// Returns registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stages.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.read().is_empty()
    }
}
