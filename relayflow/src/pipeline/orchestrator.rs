//! Pipeline orchestrator.
//!
//! Drives a [`PipelineDefinition`] over an [`ExecutionState`]. Every stage
//! invocation goes through the same sequence:
//!
//! 1. completion / condition / entry-condition gates
//! 2. `before_stage` hooks
//! 3. the stage's circuit breaker
//! 4. a retry-wrapped call on a private copy of the state
//! 5. absorb of the owned fields, `after_stage` hooks, handoff validation
//!    and a phase-transition checkpoint
//!
//! Failures run `on_error` hooks and the stage's `cleanup`, then either end
//! the pipeline or are isolated, depending on the strategy and the stage's
//! execution mode.

use super::hooks::{HookChain, StageHook};
use super::spec::{ExecutionStrategy, PipelineDefinition, StageSpec};
use crate::cancellation::CancellationToken;
use crate::checkpoint::{CheckpointStore, CheckpointType};
use crate::context::{ExecutionHistory, ExecutionState, StageExecutionContext};
use crate::core::{SkipReason, StageFailure, StageOutcome};
use crate::errors::{RelayflowError, StageError};
use crate::events::EventChannel;
use crate::observability::SpanTimer;
use crate::resilience::{
    CircuitBreakerRegistry, RetryBudget, RetryConfig, RetryObserver, RetryPolicy, RetryScope,
};
use crate::stages::{StageRegistry, WorkerStage};
use crate::validation::HandoffValidator;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};

/// Phase name used as the handoff target after the last stage.
pub const END_PHASE: &str = "end";

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Default per-call stage timeout.
    pub stage_timeout_ms: u64,
    /// Failed attempts allowed across all stages of one run.
    pub retry_budget: u32,
    /// Execution history capacity.
    pub history_capacity: usize,
    /// Run the handoff validator after each stage.
    pub validate_handoffs: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: 120_000,
            retry_budget: 10,
            history_capacity: crate::context::DEFAULT_HISTORY_CAPACITY,
            validate_handoffs: true,
        }
    }
}

impl OrchestratorConfig {
    /// Sets the default stage timeout.
    #[must_use]
    pub fn with_stage_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stage_timeout_ms = timeout_ms;
        self
    }

    /// Sets the per-run retry budget.
    #[must_use]
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Sets the history capacity.
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Enables or disables handoff validation.
    #[must_use]
    pub fn with_handoff_validation(mut self, enabled: bool) -> Self {
        self.validate_handoffs = enabled;
        self
    }
}

/// Per-run collaborators handed to [`Orchestrator::execute`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineRun<'a> {
    /// Session-scoped retry budget.
    pub budget: &'a RetryBudget,
    /// Session cancellation.
    pub cancel: &'a CancellationToken,
    /// Lifecycle events, if the caller wants them.
    pub events: Option<&'a EventChannel>,
    /// Passed through to stages and governs intermediate events.
    pub stream_updates: bool,
}

/// Result of a pipeline run that did not fail fatally.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    /// Final state.
    pub state: ExecutionState,
    /// Outcome per stage in definition order.
    pub outcomes: Vec<(String, StageOutcome)>,
    /// True if any stage failed or was blocked by its breaker.
    pub partial: bool,
}

impl PipelineOutcome {
    /// Looks up the outcome of a stage.
    #[must_use]
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, outcome)| outcome)
    }
}

enum Invocation {
    Produced {
        working: ExecutionState,
        ctx: StageExecutionContext,
        duration_ms: f64,
    },
    Skipped(SkipReason),
    Failed {
        error: RelayflowError,
        retry_count: u32,
    },
}

struct StageRetryObserver<'a> {
    hooks: &'a HookChain,
    state: &'a ExecutionState,
    events: Option<&'a EventChannel>,
}

#[async_trait]
impl RetryObserver for StageRetryObserver<'_> {
    async fn on_retry(&self, ctx: &StageExecutionContext, error: &StageError, delay: Duration) {
        self.hooks.run_retry(ctx, self.state, delay).await;
        if let Some(events) = self.events {
            events
                .thinking(
                    &ctx.stage_name,
                    format!("Retrying after error (attempt {}): {error}", ctx.retry_count + 1),
                )
                .await;
        }
    }
}

fn is_partial(outcome: &StageOutcome) -> bool {
    outcome.is_failed() || outcome.skip_reason() == Some(SkipReason::BreakerOpen)
}

/// Composes breakers, retries, hooks, validation and checkpoints around
/// registered worker stages.
#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<StageRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    validator: Arc<HandoffValidator>,
    checkpoints: Arc<CheckpointStore>,
    hooks: HookChain,
    history: Arc<ExecutionHistory>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Creates an orchestrator with default collaborators.
    #[must_use]
    pub fn new(registry: Arc<StageRegistry>, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            breakers: Arc::new(CircuitBreakerRegistry::default()),
            retry: RetryPolicy::new(RetryConfig::default()),
            validator: Arc::new(HandoffValidator::default()),
            checkpoints: Arc::new(CheckpointStore::new(crate::checkpoint::CheckpointConfig::default())),
            hooks: HookChain::new(),
            history: Arc::new(ExecutionHistory::new(config.history_capacity)),
            config,
        }
    }

    /// Shares a breaker registry.
    #[must_use]
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = RetryPolicy::new(config);
        self
    }

    /// Shares a handoff validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<HandoffValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Shares a checkpoint store.
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    /// Adds a hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn StageHook>) -> Self {
        self.hooks.add(hook);
        self
    }

    /// Returns the stage registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    /// Returns the breaker registry.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Returns the validator.
    #[must_use]
    pub fn validator(&self) -> &Arc<HandoffValidator> {
        &self.validator
    }

    /// Returns the checkpoint store.
    #[must_use]
    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    /// Returns the execution history.
    #[must_use]
    pub fn history(&self) -> &Arc<ExecutionHistory> {
        &self.history
    }

    /// Returns the config.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Creates a fresh retry budget for one run.
    #[must_use]
    pub fn new_budget(&self) -> RetryBudget {
        RetryBudget::new(self.config.retry_budget)
    }

    /// Executes a pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first pipeline-fatal error: a required stage exhausting its
    /// retries or failing permanently, a blocked handoff under the sequential
    /// or conditional strategy, a write-once conflict, or cancellation.
    pub async fn execute(
        &self,
        definition: &PipelineDefinition,
        state: ExecutionState,
        run: PipelineRun<'_>,
    ) -> Result<PipelineOutcome, RelayflowError> {
        for spec in definition.stages() {
            self.validator
                .register_stage_fields(spec.name.clone(), spec.produces.clone());
        }

        let timer = SpanTimer::start(format!("pipeline.{}", definition.name()));
        let run_id = state.run_id.clone();
        info!(
            pipeline = definition.name(),
            run_id = %run_id,
            strategy = %definition.strategy(),
            stages = definition.stages().len(),
            "Pipeline started"
        );

        let result = match definition.strategy() {
            ExecutionStrategy::Sequential | ExecutionStrategy::Conditional => {
                self.execute_in_order(definition, state, run).await
            }
            ExecutionStrategy::Parallel => self.execute_parallel(definition, state, run).await,
        };

        match &result {
            Ok(outcome) => info!(
                pipeline = definition.name(),
                run_id = %run_id,
                partial = outcome.partial,
                duration_ms = timer.elapsed_ms(),
                "Pipeline finished"
            ),
            Err(e) => warn!(
                pipeline = definition.name(),
                run_id = %run_id,
                code = e.code(),
                error = %e,
                duration_ms = timer.elapsed_ms(),
                "Pipeline failed"
            ),
        }
        result
    }

    async fn execute_in_order(
        &self,
        definition: &PipelineDefinition,
        mut state: ExecutionState,
        run: PipelineRun<'_>,
    ) -> Result<PipelineOutcome, RelayflowError> {
        let stages = definition.stages();
        let mut outcomes = Vec::with_capacity(stages.len());
        let mut partial = false;

        for (index, spec) in stages.iter().enumerate() {
            if run.cancel.is_cancelled() {
                return Err(RelayflowError::Cancelled(run.cancel.reason().unwrap_or_default()));
            }
            let next = stages.get(index + 1).map_or(END_PHASE, |s| s.name.as_str());

            let outcome = match self.invoke(spec, &state, definition.strategy(), run).await {
                Invocation::Skipped(reason) => StageOutcome::skipped(reason),
                Invocation::Produced {
                    working,
                    ctx,
                    duration_ms,
                } => {
                    let outcome = self
                        .complete(spec, &mut state, &working, ctx, next, duration_ms, run)
                        .await?;
                    self.checkpoints
                        .save(&state, CheckpointType::PhaseTransition, &spec.name, None)
                        .await;
                    outcome
                }
                Invocation::Failed { error, retry_count } => {
                    if matches!(error, RelayflowError::Cancelled(_)) || spec.is_required() {
                        return Err(error);
                    }
                    warn!(
                        stage = %spec.name,
                        run_id = %state.run_id,
                        error = %error,
                        "Optional stage failed, continuing"
                    );
                    StageOutcome::Failed(StageFailure::from_error(&error, retry_count))
                }
            };

            partial |= is_partial(&outcome);
            outcomes.push((spec.name.clone(), outcome));
        }

        Ok(PipelineOutcome {
            state,
            outcomes,
            partial,
        })
    }

    async fn execute_parallel(
        &self,
        definition: &PipelineDefinition,
        mut state: ExecutionState,
        run: PipelineRun<'_>,
    ) -> Result<PipelineOutcome, RelayflowError> {
        let base = state.clone();
        let branches = definition.stages().iter().map(|spec| {
            let base = &base;
            async move {
                match self.invoke(spec, base, ExecutionStrategy::Parallel, run).await {
                    Invocation::Skipped(reason) => (StageOutcome::skipped(reason), None, None),
                    Invocation::Produced {
                        working,
                        ctx,
                        duration_ms,
                    } => {
                        let retry_count = ctx.retry_count;
                        let mut branch = base.clone();
                        match self
                            .complete(spec, &mut branch, &working, ctx, END_PHASE, duration_ms, run)
                            .await
                        {
                            Ok(outcome) => (outcome, Some(branch), None),
                            Err(error) => {
                                let outcome =
                                    StageOutcome::Failed(StageFailure::from_error(&error, retry_count));
                                (outcome, None, Some(error))
                            }
                        }
                    }
                    Invocation::Failed { error, retry_count } => {
                        let outcome =
                            StageOutcome::Failed(StageFailure::from_error(&error, retry_count));
                        (outcome, None, Some(error))
                    }
                }
            }
        });
        let results = join_all(branches).await;

        let mut outcomes = Vec::with_capacity(results.len());
        let mut partial = false;
        for (spec, (outcome, branch, error)) in definition.stages().iter().zip(results) {
            if let Some(error) = error {
                if matches!(error, RelayflowError::Cancelled(_)) {
                    return Err(error);
                }
                warn!(
                    stage = %spec.name,
                    run_id = %state.run_id,
                    error = %error,
                    "Parallel branch failed, fields left absent"
                );
            }
            if let Some(branch) = branch {
                // Branch step counts started from the shared base; count each merge once.
                state.absorb(&branch, &spec.produces, &spec.name)?;
                state.step_count += 1;
                self.checkpoints
                    .save(&state, CheckpointType::PhaseTransition, &spec.name, None)
                    .await;
            }
            partial |= is_partial(&outcome);
            outcomes.push((spec.name.clone(), outcome));
        }

        Ok(PipelineOutcome {
            state,
            outcomes,
            partial,
        })
    }

    async fn invoke(
        &self,
        spec: &StageSpec,
        state: &ExecutionState,
        strategy: ExecutionStrategy,
        run: PipelineRun<'_>,
    ) -> Invocation {
        if spec.is_already_completed(state) {
            info!(stage = %spec.name, run_id = %state.run_id, "Stage already completed, skipping");
            return Invocation::Skipped(SkipReason::AlreadyCompleted);
        }
        if strategy == ExecutionStrategy::Conditional && !spec.condition.evaluate(state) {
            info!(stage = %spec.name, run_id = %state.run_id, "Stage condition not met, skipping");
            return Invocation::Skipped(SkipReason::ConditionNotMet);
        }

        let Some(worker) = self.registry.get(&spec.name) else {
            return Invocation::Failed {
                error: RelayflowError::StageNotRegistered {
                    stage: spec.name.clone(),
                },
                retry_count: 0,
            };
        };
        if !worker.check_entry_conditions(state, &state.run_id).await {
            info!(stage = %spec.name, run_id = %state.run_id, "Entry conditions not met, skipping");
            return Invocation::Skipped(SkipReason::EntryConditionsNotMet);
        }

        let span = info_span!("stage", stage = %spec.name, run_id = %state.run_id);
        self.invoke_worker(spec, worker, state, run)
            .instrument(span)
            .await
    }

    async fn invoke_worker(
        &self,
        spec: &StageSpec,
        worker: Arc<dyn WorkerStage>,
        state: &ExecutionState,
        run: PipelineRun<'_>,
    ) -> Invocation {
        let timer = SpanTimer::start(format!("stage.{}", spec.name));
        let mut ctx = StageExecutionContext::for_state(&spec.name, state, self.retry.config().max_retries);
        self.hooks.run_before(&ctx, state).await;

        let breaker = self.breakers.get(&spec.name);
        if !breaker.would_admit() {
            warn!(stage = %spec.name, run_id = %state.run_id, "Circuit breaker open, skipping stage");
            return Invocation::Skipped(SkipReason::BreakerOpen);
        }

        if let Some(events) = run.events {
            events.stage_executing(&spec.name).await;
        }

        let observer = StageRetryObserver {
            hooks: &self.hooks,
            state,
            events: run.events,
        };
        let scope = RetryScope {
            breaker: &breaker,
            budget: run.budget,
            cancel: run.cancel,
            observer: &observer,
            timeout: spec.timeout_or(self.config.stage_timeout_ms),
        };
        let run_id = state.run_id.clone();
        let stream_updates = run.stream_updates;
        let result = self
            .retry
            .execute(&mut ctx, scope, |_attempt| {
                let worker = Arc::clone(&worker);
                let mut working = state.clone();
                let run_id = run_id.clone();
                async move {
                    worker.execute(&mut working, &run_id, stream_updates).await?;
                    Ok(working)
                }
            })
            .await;

        match result {
            Ok(working) => Invocation::Produced {
                working,
                ctx,
                duration_ms: timer.finish(),
            },
            Err(RelayflowError::BreakerOpen { .. }) => {
                warn!(stage = %spec.name, run_id = %state.run_id, "Circuit breaker opened mid-retry, skipping stage");
                Invocation::Skipped(SkipReason::BreakerOpen)
            }
            Err(error) => {
                let message = error.to_string();
                ctx.mark_failed(message.clone(), timer.finish());
                self.hooks.run_error(&ctx, state, &message).await;
                worker.cleanup(state, &state.run_id).await;
                let retry_count = ctx.retry_count;
                self.history.record(ctx);
                Invocation::Failed { error, retry_count }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete(
        &self,
        spec: &StageSpec,
        target: &mut ExecutionState,
        working: &ExecutionState,
        mut ctx: StageExecutionContext,
        next: &str,
        duration_ms: f64,
        run: PipelineRun<'_>,
    ) -> Result<StageOutcome, RelayflowError> {
        let fields = target.absorb(working, &spec.produces, &spec.name)?;
        target.step_count += 1;
        ctx.mark_completed(duration_ms);
        self.hooks.run_after(&ctx, target).await;

        if let Some(events) = run.events {
            events
                .stage_completed(
                    &spec.name,
                    serde_json::json!({ "stage": spec.name, "fields": fields }),
                )
                .await;
        }

        if self.config.validate_handoffs {
            if let Err(err) =
                self.validator
                    .validate_pipeline_handoff(target, &spec.name, next, &target.run_id)
            {
                let error = RelayflowError::from(err);
                let message = error.to_string();
                ctx.mark_failed(message.clone(), duration_ms);
                self.hooks.run_error(&ctx, target, &message).await;
                self.history.record(ctx);
                return Err(error);
            }
        }

        info!(
            stage = %spec.name,
            run_id = %target.run_id,
            retry_count = ctx.retry_count,
            duration_ms,
            "Stage completed"
        );
        let outcome = StageOutcome::Success {
            fields,
            retry_count: ctx.retry_count,
            duration_ms,
        };
        self.history.record(ctx);
        Ok(outcome)
    }
}
