//! Stage hooks and the ordered hook chain.

use crate::context::{ExecutionState, StageExecutionContext};
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Extension point fired around every stage invocation.
///
/// Errors and panics from hooks are caught and logged; they never abort a
/// pipeline.
#[async_trait]
pub trait StageHook: Send + Sync {
    /// Returns the hook's name for logging.
    fn name(&self) -> &str {
        "hook"
    }

    /// Returns the hook's priority (lower = earlier execution).
    fn priority(&self) -> i32 {
        0
    }

    /// Called before the stage runs.
    async fn before_stage(
        &self,
        _ctx: &StageExecutionContext,
        _state: &ExecutionState,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after the stage succeeded and its fields were absorbed.
    async fn after_stage(
        &self,
        _ctx: &StageExecutionContext,
        _state: &ExecutionState,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the stage failed for good.
    async fn on_error(
        &self,
        _ctx: &StageExecutionContext,
        _state: &ExecutionState,
        _error: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called before each retry sleep.
    async fn on_retry(
        &self,
        _ctx: &StageExecutionContext,
        _state: &ExecutionState,
        _delay: Duration,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks ordered by priority.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn StageHook>>,
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.hooks.iter().map(|h| h.name()).collect();
        f.debug_struct("HookChain").field("hooks", &names).finish()
    }
}

async fn guarded<Fut>(hook: &dyn StageHook, event: &str, stage: &str, call: Fut)
where
    Fut: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(
            hook = hook.name(),
            event,
            stage,
            error = %format!("{e:#}"),
            "Stage hook failed"
        ),
        Err(_) => warn!(hook = hook.name(), event, stage, "Stage hook panicked"),
    }
}

impl HookChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hook, keeping the chain sorted by priority.
    pub fn add(&mut self, hook: Arc<dyn StageHook>) {
        self.hooks.push(hook);
        self.hooks.sort_by_key(|h| h.priority());
    }

    /// Runs every `before_stage`.
    pub async fn run_before(&self, ctx: &StageExecutionContext, state: &ExecutionState) {
        for hook in &self.hooks {
            guarded(hook.as_ref(), "before_stage", &ctx.stage_name, hook.before_stage(ctx, state)).await;
        }
    }

    /// Runs every `after_stage`, in reverse priority order.
    pub async fn run_after(&self, ctx: &StageExecutionContext, state: &ExecutionState) {
        for hook in self.hooks.iter().rev() {
            guarded(hook.as_ref(), "after_stage", &ctx.stage_name, hook.after_stage(ctx, state)).await;
        }
    }

    /// Runs every `on_error`.
    pub async fn run_error(&self, ctx: &StageExecutionContext, state: &ExecutionState, error: &str) {
        for hook in &self.hooks {
            guarded(hook.as_ref(), "on_error", &ctx.stage_name, hook.on_error(ctx, state, error)).await;
        }
    }

    /// Runs every `on_retry`.
    pub async fn run_retry(&self, ctx: &StageExecutionContext, state: &ExecutionState, delay: Duration) {
        for hook in &self.hooks {
            guarded(hook.as_ref(), "on_retry", &ctx.stage_name, hook.on_retry(ctx, state, delay)).await;
        }
    }

    /// Returns the number of hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunIdentity;
    use parking_lot::Mutex;

    struct OrderHook {
        label: &'static str,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl StageHook for OrderHook {
        fn name(&self) -> &str {
            self.label
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn before_stage(
            &self,
            ctx: &StageExecutionContext,
            _state: &ExecutionState,
        ) -> anyhow::Result<()> {
            self.log.lock().push(format!("{}:{}", self.label, ctx.stage_name));
            Ok(())
        }
    }

    struct FaultyHook;

    #[async_trait]
    impl StageHook for FaultyHook {
        async fn before_stage(
            &self,
            _ctx: &StageExecutionContext,
            _state: &ExecutionState,
        ) -> anyhow::Result<()> {
            anyhow::bail!("hook exploded")
        }

        async fn after_stage(
            &self,
            _ctx: &StageExecutionContext,
            _state: &ExecutionState,
        ) -> anyhow::Result<()> {
            panic!("hook panicked")
        }
    }

    fn fixtures() -> (StageExecutionContext, ExecutionState) {
        let state = ExecutionState::new(&RunIdentity::new("u", "t", "r"), "req");
        (StageExecutionContext::for_state("triage", &state, 3), state)
    }

    #[tokio::test]
    async fn test_chain_orders_by_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HookChain::new();
        for (label, priority) in [("late", 10), ("early", -5), ("mid", 0)] {
            chain.add(Arc::new(OrderHook {
                label,
                priority,
                log: log.clone(),
            }));
        }

        let (ctx, state) = fixtures();
        chain.run_before(&ctx, &state).await;

        assert_eq!(chain.len(), 3);
        assert_eq!(
            *log.lock(),
            vec!["early:triage", "mid:triage", "late:triage"]
        );
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_contained() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HookChain::new();
        chain.add(Arc::new(FaultyHook));
        chain.add(Arc::new(OrderHook {
            label: "after-faulty",
            priority: 1,
            log: log.clone(),
        }));

        let (ctx, state) = fixtures();
        chain.run_before(&ctx, &state).await;
        chain.run_after(&ctx, &state).await;
        chain.run_error(&ctx, &state, "boom").await;

        assert_eq!(*log.lock(), vec!["after-faulty:triage"]);
    }
}
