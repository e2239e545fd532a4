//! Session coordinator: the entry point for one user request.

use super::lifecycle::{SessionLifecycle, SessionPhase};
use crate::cancellation::CancellationToken;
use crate::checkpoint::{
    Checkpoint, CheckpointStore, CheckpointType, HeartbeatMonitor, RecoveryConfig,
    RecoveryManager,
};
use crate::context::{stage_names, ExecutionState, RunIdentity, StageExecutionContext};
use crate::core::StageOutcome;
use crate::errors::{RelayflowError, SessionError};
use crate::events::{EventChannel, EventChannelConfig, Transport};
use crate::pipeline::{
    ExecutionStrategy, Orchestrator, PipelineBuilder, PipelineDefinition, PipelineRun, StageHook,
    StageSpec,
};
use crate::resilience::Clock;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Session coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name given to built pipelines.
    pub pipeline_name: String,
    /// Strategy of built pipelines.
    pub strategy: ExecutionStrategy,
    /// Stages in order. Standard names own their standard field.
    pub stages: Vec<String>,
    /// Stages whose failure does not end the pipeline.
    pub optional_stages: Vec<String>,
    /// How often a running session records a heartbeat.
    pub heartbeat_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pipeline_name: "standard".to_string(),
            strategy: ExecutionStrategy::Sequential,
            stages: [
                stage_names::TRIAGE,
                stage_names::DATA,
                stage_names::OPTIMIZATION,
                stage_names::ACTION_PLAN,
                stage_names::REPORTING,
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            optional_stages: Vec::new(),
            heartbeat_interval_ms: 15_000,
        }
    }
}

impl SessionConfig {
    /// Sets the stage list.
    #[must_use]
    pub fn with_stages(mut self, stages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stages = stages.into_iter().map(Into::into).collect();
        self
    }

    /// Marks a stage optional.
    #[must_use]
    pub fn with_optional_stage(mut self, stage: impl Into<String>) -> Self {
        self.optional_stages.push(stage.into());
        self
    }

    /// Sets the strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }
}

/// One user request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Requesting user.
    pub user_id: String,
    /// Conversation thread.
    pub thread_id: String,
    /// The request text.
    pub message: String,
}

impl SessionRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        thread_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            thread_id: thread_id.into(),
            message: message.into(),
        }
    }
}

/// Result of a session that did not fail fatally.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    /// The run.
    pub run_id: String,
    /// Final or partial state.
    pub state: ExecutionState,
    /// True if some stage failed or was blocked.
    pub partial: bool,
    /// Outcome per stage.
    pub outcomes: Vec<(String, StageOutcome)>,
    /// True if the run resumed from recovered state.
    pub resumed: bool,
}

struct SessionEntry {
    lifecycle: Mutex<SessionLifecycle>,
    cancel: Mutex<Arc<CancellationToken>>,
}

impl SessionEntry {
    fn new(lifecycle: SessionLifecycle) -> Self {
        Self {
            lifecycle: Mutex::new(lifecycle),
            cancel: Mutex::new(Arc::new(CancellationToken::new())),
        }
    }

    /// Installs a fresh token for a new attempt and returns it.
    fn renew_token(&self) -> Arc<CancellationToken> {
        let token = Arc::new(CancellationToken::new());
        *self.cancel.lock() = Arc::clone(&token);
        token
    }

    fn token(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancel.lock())
    }

    fn phase(&self) -> SessionPhase {
        self.lifecycle.lock().phase()
    }

    fn transition(&self, next: SessionPhase) -> Result<(), SessionError> {
        self.lifecycle.lock().transition(next)
    }
}

/// Publishes the latest state of each run for the auto-checkpoint supervisor.
struct LiveStateHook {
    live: Arc<DashMap<String, ExecutionState>>,
}

#[async_trait]
impl StageHook for LiveStateHook {
    fn name(&self) -> &str {
        "live_state"
    }

    fn priority(&self) -> i32 {
        i32::MIN
    }

    async fn after_stage(
        &self,
        ctx: &StageExecutionContext,
        state: &ExecutionState,
    ) -> anyhow::Result<()> {
        self.live.insert(ctx.run_id.clone(), state.clone());
        Ok(())
    }
}

/// Aborts the supervisor task when the session future ends or is dropped.
struct SupervisorGuard(JoinHandle<()>);

impl Drop for SupervisorGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Builds per-request pipelines and owns session lifecycles.
pub struct SessionCoordinator {
    orchestrator: Arc<Orchestrator>,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    event_config: EventChannelConfig,
    recovery_config: RecoveryConfig,
    recovery: RecoveryManager,
    heartbeats: Arc<HeartbeatMonitor>,
    sessions: DashMap<String, Arc<SessionEntry>>,
    live: Arc<DashMap<String, ExecutionState>>,
}

impl SessionCoordinator {
    /// Creates a coordinator around an orchestrator.
    #[must_use]
    pub fn new(orchestrator: Orchestrator, transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let live = Arc::new(DashMap::new());
        let orchestrator = Arc::new(orchestrator.with_hook(Arc::new(LiveStateHook {
            live: Arc::clone(&live),
        })));
        let recovery_config = RecoveryConfig::default();
        Self {
            recovery: RecoveryManager::new(Arc::clone(orchestrator.checkpoints()), recovery_config.clone()),
            heartbeats: Arc::new(HeartbeatMonitor::new(recovery_config.heartbeat_timeout())),
            orchestrator,
            transport,
            config,
            event_config: EventChannelConfig::default(),
            recovery_config,
            sessions: DashMap::new(),
            live,
        }
    }

    /// Sets the recovery configuration.
    #[must_use]
    pub fn with_recovery_config(mut self, config: RecoveryConfig) -> Self {
        self.recovery = RecoveryManager::new(Arc::clone(self.orchestrator.checkpoints()), config.clone());
        self.heartbeats = Arc::new(HeartbeatMonitor::new(config.heartbeat_timeout()));
        self.recovery_config = config;
        self
    }

    /// Sets the event channel configuration used for new sessions.
    #[must_use]
    pub fn with_event_config(mut self, config: EventChannelConfig) -> Self {
        self.event_config = config;
        self
    }

    /// Uses `clock` for heartbeat liveness.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.heartbeats = Arc::new(HeartbeatMonitor::with_clock(
            self.recovery_config.heartbeat_timeout(),
            clock,
        ));
        self
    }

    /// Returns the orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Returns the checkpoint store.
    #[must_use]
    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        self.orchestrator.checkpoints()
    }

    /// Returns the heartbeat monitor.
    #[must_use]
    pub fn heartbeats(&self) -> &Arc<HeartbeatMonitor> {
        &self.heartbeats
    }

    /// Builds the configured pipeline.
    ///
    /// # Errors
    ///
    /// Returns the builder's validation error.
    pub fn standard_pipeline(&self) -> Result<PipelineDefinition, RelayflowError> {
        let specs = self.config.stages.iter().map(|name| {
            let spec = StageSpec::standard(name);
            if self.config.optional_stages.contains(name) {
                spec.optional()
            } else {
                spec
            }
        });
        PipelineBuilder::new(self.config.pipeline_name.clone())
            .with_strategy(self.config.strategy)
            .stages(specs)
            .build(self.orchestrator.registry())
    }

    /// Runs a new session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyRunning`] for a run in flight, pipeline
    /// build errors, and any pipeline-fatal error. A fatal error leaves the
    /// session [`SessionPhase::Crashed`] so it can be resumed.
    pub async fn start_session(
        &self,
        request: SessionRequest,
        run_id: Option<String>,
        stream_updates: bool,
    ) -> Result<SessionOutcome, RelayflowError> {
        let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let definition = self.standard_pipeline()?;
        let mut lifecycle = SessionLifecycle::new(&run_id);
        lifecycle.transition(SessionPhase::Initialized)?;

        let entry = Arc::new(SessionEntry::new(lifecycle));
        match self.sessions.entry(run_id.clone()) {
            Entry::Occupied(mut held) => {
                if matches!(held.get().phase(), SessionPhase::Initialized | SessionPhase::Running) {
                    return Err(SessionError::AlreadyRunning(run_id).into());
                }
                held.insert(Arc::clone(&entry));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&entry));
            }
        }

        let identity = RunIdentity::new(&request.user_id, &request.thread_id, &run_id);
        let mut state = ExecutionState::new(&identity, request.message);
        if let Some(durable) = self.checkpoints().durable_store() {
            state.thread_context = durable.load_thread_context(&request.thread_id).await;
        }
        info!(run_id = %run_id, user_id = %request.user_id, "Session initialized");

        self.drive(&entry, &definition, state, stream_updates, false).await
    }

    /// Resumes a crashed session from its checkpoints.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] for a live or completed session,
    /// [`RelayflowError::RecoveryFailed`] when no state could be recovered,
    /// and any pipeline-fatal error.
    pub async fn resume_session(
        &self,
        run_id: &str,
        stream_updates: bool,
    ) -> Result<SessionOutcome, RelayflowError> {
        let entry = match self.sessions.get(run_id).map(|e| Arc::clone(e.value())) {
            Some(entry) => {
                if entry.phase() == SessionPhase::Running {
                    if self.heartbeats.is_alive(run_id) {
                        return Err(SessionError::AlreadyRunning(run_id.to_string()).into());
                    }
                    entry.transition(SessionPhase::Crashed)?;
                }
                entry
            }
            None => {
                let entry = Arc::new(SessionEntry::new(SessionLifecycle::orphaned(run_id)));
                self.sessions.insert(run_id.to_string(), Arc::clone(&entry));
                entry
            }
        };
        if entry.phase() != SessionPhase::Crashed {
            return Err(SessionError::InvalidTransition {
                run_id: run_id.to_string(),
                from: entry.phase(),
                to: SessionPhase::Running,
            }
            .into());
        }

        let report = self.recovery.recover(run_id).await;
        let Some(state) = report.state else {
            return Err(RelayflowError::RecoveryFailed {
                run_id: run_id.to_string(),
                status: report.status.to_string(),
            });
        };
        info!(
            run_id = %run_id,
            recovered_fields = report.sources.len(),
            last_phase = ?report.last_phase,
            "Resuming session"
        );

        let definition = self.standard_pipeline()?;
        self.drive(&entry, &definition, state, stream_updates, true).await
    }

    async fn drive(
        &self,
        entry: &SessionEntry,
        definition: &PipelineDefinition,
        state: ExecutionState,
        stream_updates: bool,
        resumed: bool,
    ) -> Result<SessionOutcome, RelayflowError> {
        let run_id = state.run_id.clone();
        entry.transition(SessionPhase::Running)?;
        let cancel = if resumed { entry.renew_token() } else { entry.token() };
        self.heartbeats.beat(&run_id);
        self.live.insert(run_id.clone(), state.clone());
        let supervisor = self.spawn_supervisor(&run_id);

        let events = EventChannel::new(
            state.session_id.clone(),
            state.user_id.clone(),
            Arc::clone(&self.transport),
            self.event_config.clone(),
            stream_updates,
        );
        events
            .started(serde_json::json!({
                "run_id": run_id,
                "pipeline": definition.name(),
                "resumed": resumed,
            }))
            .await;

        let budget = self.orchestrator.new_budget();
        let run = PipelineRun {
            budget: &budget,
            cancel: &cancel,
            events: Some(&events),
            stream_updates,
        };
        let result = self.orchestrator.execute(definition, state, run).await;
        drop(supervisor);
        self.heartbeats.remove(&run_id);
        self.live.remove(&run_id);

        match result {
            Ok(outcome) => {
                entry.transition(SessionPhase::Completed)?;
                let completed: Vec<&str> = outcome
                    .outcomes
                    .iter()
                    .filter(|(_, o)| o.is_success())
                    .map(|(name, _)| name.as_str())
                    .collect();
                events
                    .completed(
                        outcome.partial,
                        serde_json::json!({ "run_id": run_id, "completed_stages": completed }),
                    )
                    .await;
                info!(run_id = %run_id, partial = outcome.partial, "Session completed");
                Ok(SessionOutcome {
                    run_id,
                    state: outcome.state,
                    partial: outcome.partial,
                    outcomes: outcome.outcomes,
                    resumed,
                })
            }
            Err(error) => {
                if let Err(e) = entry.transition(SessionPhase::Crashed) {
                    warn!(run_id = %run_id, error = %e, "Could not mark session crashed");
                }
                events.failed(&error).await;
                warn!(run_id = %run_id, code = error.code(), error = %error, "Session failed");
                Err(error)
            }
        }
    }

    fn spawn_supervisor(&self, run_id: &str) -> SupervisorGuard {
        let run_id = run_id.to_string();
        let store = Arc::clone(self.orchestrator.checkpoints());
        let heartbeats = Arc::clone(&self.heartbeats);
        let live = Arc::clone(&self.live);
        let beat_every = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
        let checkpoint_every = store.config().auto_interval().max(Duration::from_secs(1));

        SupervisorGuard(tokio::spawn(async move {
            let mut beat = tokio::time::interval(beat_every);
            let mut auto = tokio::time::interval_at(
                tokio::time::Instant::now() + checkpoint_every,
                checkpoint_every,
            );
            loop {
                tokio::select! {
                    _ = beat.tick() => heartbeats.beat(&run_id),
                    _ = auto.tick() => {
                        let snapshot = live.get(&run_id).map(|s| s.value().clone());
                        if let Some(state) = snapshot {
                            store.save(&state, CheckpointType::Auto, "auto", None).await;
                        }
                    }
                }
            }
        }))
    }

    /// Requests cancellation of a running session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownSession`] for an unknown run.
    pub fn cancel_session(&self, run_id: &str, reason: impl Into<String>) -> Result<(), SessionError> {
        let entry = self
            .sessions
            .get(run_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| SessionError::UnknownSession(run_id.to_string()))?;
        let reason = reason.into();
        if entry.token().cancel(reason.clone()) {
            info!(run_id = %run_id, reason = %reason, "Cancelling session");
        }
        Ok(())
    }

    /// Marks running sessions whose heartbeat went stale as crashed and
    /// returns their run IDs.
    pub fn detect_crashed_sessions(&self) -> Vec<String> {
        let mut crashed = Vec::new();
        for run_id in self.heartbeats.stale_runs() {
            self.heartbeats.remove(&run_id);
            let Some(entry) = self.sessions.get(&run_id).map(|e| Arc::clone(e.value())) else {
                continue;
            };
            if entry.phase() == SessionPhase::Running && entry.transition(SessionPhase::Crashed).is_ok() {
                warn!(run_id = %run_id, "Session heartbeat timed out, marked crashed");
                crashed.push(run_id);
            }
        }
        crashed
    }

    /// Writes a manual checkpoint.
    pub async fn manual_checkpoint(
        &self,
        state: &ExecutionState,
        label: impl Into<String>,
    ) -> Option<Checkpoint> {
        self.checkpoints()
            .save(state, CheckpointType::Manual, "manual", Some(label.into()))
            .await
    }

    /// Returns the phase of a session.
    #[must_use]
    pub fn session_phase(&self, run_id: &str) -> Option<SessionPhase> {
        self.sessions.get(run_id).map(|e| e.phase())
    }

    /// Forgets a finished session and its checkpoints.
    ///
    /// A running session is left untouched.
    pub fn forget_session(&self, run_id: &str) {
        if self.session_phase(run_id) == Some(SessionPhase::Running) {
            return;
        }
        self.sessions.remove(run_id);
        self.checkpoints().forget(run_id);
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
