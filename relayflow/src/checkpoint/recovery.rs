//! Tiered state recovery bounded by an SLA.

use super::store::CheckpointStore;
use crate::context::{ExecutionState, StateField};
use crate::observability::SpanTimer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Recovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Upper bound on one recovery.
    pub sla_ms: u64,
    /// Silence after which a running session counts as crashed.
    pub heartbeat_timeout_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            sla_ms: 30_000,
            heartbeat_timeout_secs: 60,
        }
    }
}

impl RecoveryConfig {
    /// Sets the SLA.
    #[must_use]
    pub fn with_sla_ms(mut self, sla_ms: u64) -> Self {
        self.sla_ms = sla_ms;
        self
    }

    /// Sets the heartbeat timeout.
    #[must_use]
    pub fn with_heartbeat_timeout_secs(mut self, secs: u64) -> Self {
        self.heartbeat_timeout_secs = secs;
        self
    }

    /// Returns the SLA as a duration.
    #[must_use]
    pub fn sla(&self) -> Duration {
        Duration::from_millis(self.sla_ms)
    }

    /// Returns the heartbeat timeout as a duration.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

/// Terminal status of a recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// State was reconstructed.
    Recovered,
    /// No tier held anything for the run.
    NotFound,
    /// The SLA elapsed before recovery finished.
    SlaExceeded,
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recovered => write!(f, "recovered"),
            Self::NotFound => write!(f, "not_found"),
            Self::SlaExceeded => write!(f, "sla_exceeded"),
        }
    }
}

/// Tier a recovered field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySource {
    /// The fast checkpoint tier.
    FastTier,
    /// The durable state store.
    DurableStore,
    /// The in-process fallback.
    Fallback,
}

/// Outcome of one recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Run being recovered.
    pub run_id: String,
    /// Terminal status.
    pub status: RecoveryStatus,
    /// Reconstructed state when recovered.
    pub state: Option<ExecutionState>,
    /// Where each recovered field came from.
    pub sources: BTreeMap<StateField, RecoverySource>,
    /// Stage phase of the newest checkpoint found.
    pub last_phase: Option<String>,
    /// Time spent.
    pub duration_ms: f64,
}

impl RecoveryReport {
    fn terminal(run_id: &str, status: RecoveryStatus, duration_ms: f64) -> Self {
        Self {
            run_id: run_id.to_string(),
            status,
            state: None,
            sources: BTreeMap::new(),
            last_phase: None,
            duration_ms,
        }
    }

    /// Returns true if state was reconstructed.
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        self.status == RecoveryStatus::Recovered
    }
}

/// Reconstructs execution state from the checkpoint tiers.
#[derive(Debug)]
pub struct RecoveryManager {
    store: Arc<CheckpointStore>,
    config: RecoveryConfig,
}

impl RecoveryManager {
    /// Creates a manager over a checkpoint store.
    #[must_use]
    pub fn new(store: Arc<CheckpointStore>, config: RecoveryConfig) -> Self {
        Self { store, config }
    }

    /// Returns the config.
    #[must_use]
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Recovers a run within the SLA. Never retries.
    pub async fn recover(&self, run_id: &str) -> RecoveryReport {
        let timer = SpanTimer::start("recovery");
        let report = match tokio::time::timeout(self.config.sla(), self.collect(run_id)).await {
            Ok(Some((state, sources, last_phase))) => RecoveryReport {
                run_id: run_id.to_string(),
                status: RecoveryStatus::Recovered,
                state: Some(state),
                sources,
                last_phase,
                duration_ms: timer.elapsed_ms(),
            },
            Ok(None) => RecoveryReport::terminal(run_id, RecoveryStatus::NotFound, timer.elapsed_ms()),
            Err(_) => RecoveryReport::terminal(run_id, RecoveryStatus::SlaExceeded, timer.elapsed_ms()),
        };

        if report.is_recovered() {
            info!(
                run_id = %run_id,
                fields = report.sources.len(),
                duration_ms = report.duration_ms,
                "Recovered execution state"
            );
        } else {
            warn!(run_id = %run_id, status = %report.status, "State recovery failed");
        }
        report
    }

    async fn collect(
        &self,
        run_id: &str,
    ) -> Option<(ExecutionState, BTreeMap<StateField, RecoverySource>, Option<String>)> {
        let mut candidates: Vec<(RecoverySource, ExecutionState)> = Vec::new();
        let mut last_phase = None;

        if let Some(cp) = self.store.fast_latest(run_id).await {
            match cp.restore_state() {
                Ok(state) => {
                    last_phase = Some(cp.stage_phase.clone());
                    candidates.push((RecoverySource::FastTier, state));
                }
                Err(e) => warn!(run_id = %run_id, error = %e, "Discarding unreadable fast-tier checkpoint"),
            }
        }
        if let Some(state) = self.store.durable_latest(run_id).await {
            candidates.push((RecoverySource::DurableStore, state));
        }
        if let Some(cp) = self.store.fallback_latest(run_id) {
            match cp.restore_state() {
                Ok(state) => {
                    last_phase.get_or_insert_with(|| cp.stage_phase.clone());
                    candidates.push((RecoverySource::Fallback, state));
                }
                Err(e) => warn!(run_id = %run_id, error = %e, "Discarding unreadable fallback checkpoint"),
            }
        }

        let (_, first) = candidates.first()?;
        let mut recovered = ExecutionState::new(&first.identity(), first.user_request.clone());
        recovered.step_count = candidates.iter().map(|(_, s)| s.step_count).max().unwrap_or(0);
        recovered.thread_context.clone_from(&first.thread_context);

        let mut sources = BTreeMap::new();
        for (source, candidate) in &candidates {
            for field in recovered.fill_missing_from(candidate) {
                sources.insert(field, *source);
            }
        }

        if let Some(durable) = self.store.durable_store() {
            if let Some(context) = durable.load_thread_context(&recovered.thread_id).await {
                recovered.thread_context = Some(context);
            }
        }

        Some((recovered, sources, last_phase))
    }
}
