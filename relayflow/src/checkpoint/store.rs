//! Tiered checkpoint write path.
//!
//! A save writes to the fast tier, then the durable state store, then the
//! in-process fallback. Tier failures are logged and counted; they never
//! fail the stage that triggered the checkpoint.

use super::model::{Checkpoint, CheckpointType};
use super::state_store::StateStore;
use super::tier::CheckpointTier;
use crate::context::ExecutionState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Checkpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Interval between automatic checkpoints of a running session.
    pub auto_interval_secs: u64,
    /// Skip automatic checkpoints when the state is unchanged.
    pub skip_unchanged_auto: bool,
    /// Directory for the JSON-file fast tier; in-memory when unset.
    pub file_tier_dir: Option<String>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            auto_interval_secs: 300,
            skip_unchanged_auto: true,
            file_tier_dir: None,
        }
    }
}

impl CheckpointConfig {
    /// Sets the auto-checkpoint interval.
    #[must_use]
    pub fn with_auto_interval_secs(mut self, secs: u64) -> Self {
        self.auto_interval_secs = secs;
        self
    }

    /// Returns the auto-checkpoint interval.
    #[must_use]
    pub fn auto_interval(&self) -> Duration {
        Duration::from_secs(self.auto_interval_secs)
    }
}

/// Write-path counters.
#[derive(Debug, Default)]
pub struct CheckpointMetrics {
    written: AtomicU64,
    skipped_unchanged: AtomicU64,
    fast_tier_failures: AtomicU64,
    durable_tier_failures: AtomicU64,
}

impl CheckpointMetrics {
    /// Checkpoints written.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Auto checkpoints skipped because nothing changed.
    #[must_use]
    pub fn skipped_unchanged(&self) -> u64 {
        self.skipped_unchanged.load(Ordering::Relaxed)
    }

    /// Fast tier write failures.
    #[must_use]
    pub fn fast_tier_failures(&self) -> u64 {
        self.fast_tier_failures.load(Ordering::Relaxed)
    }

    /// Durable tier write failures.
    #[must_use]
    pub fn durable_tier_failures(&self) -> u64 {
        self.durable_tier_failures.load(Ordering::Relaxed)
    }

    /// Converts metrics to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "written": self.written(),
            "skipped_unchanged": self.skipped_unchanged(),
            "fast_tier_failures": self.fast_tier_failures(),
            "durable_tier_failures": self.durable_tier_failures(),
        })
    }
}

/// Tiered checkpoint store shared by every session.
pub struct CheckpointStore {
    config: CheckpointConfig,
    fast: Option<Arc<dyn CheckpointTier>>,
    durable: Option<Arc<dyn StateStore>>,
    fallback: DashMap<String, Checkpoint>,
    phase_latest: DashMap<(String, String), Checkpoint>,
    versions: DashMap<String, u64>,
    last_digest: DashMap<String, String>,
    metrics: CheckpointMetrics,
}

impl CheckpointStore {
    /// Creates a store with only the in-process fallback.
    #[must_use]
    pub fn new(config: CheckpointConfig) -> Self {
        Self {
            config,
            fast: None,
            durable: None,
            fallback: DashMap::new(),
            phase_latest: DashMap::new(),
            versions: DashMap::new(),
            last_digest: DashMap::new(),
            metrics: CheckpointMetrics::default(),
        }
    }

    /// Sets the fast tier.
    #[must_use]
    pub fn with_fast_tier(mut self, tier: Arc<dyn CheckpointTier>) -> Self {
        self.fast = Some(tier);
        self
    }

    /// Sets the durable state store.
    #[must_use]
    pub fn with_durable_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Returns the config.
    #[must_use]
    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Returns the write-path metrics.
    #[must_use]
    pub fn metrics(&self) -> &CheckpointMetrics {
        &self.metrics
    }

    /// Returns the fast tier, if configured.
    #[must_use]
    pub fn fast_tier(&self) -> Option<&Arc<dyn CheckpointTier>> {
        self.fast.as_ref()
    }

    /// Returns the durable store, if configured.
    #[must_use]
    pub fn durable_store(&self) -> Option<&Arc<dyn StateStore>> {
        self.durable.as_ref()
    }

    /// Next version for a run. The first write for a run this process has
    /// not seen continues from the fast tier's latest version, so numbering
    /// survives a restart.
    async fn next_version(&self, run_id: &str) -> u64 {
        if !self.versions.contains_key(run_id) {
            let seed = self.fast_latest(run_id).await.map_or(0, |c| c.version);
            self.versions.entry(run_id.to_string()).or_insert(seed);
        }
        let mut entry = self.versions.entry(run_id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn keep_newest<K: Eq + Hash>(slot: &DashMap<K, Checkpoint>, key: K, checkpoint: &Checkpoint) {
        slot.entry(key)
            .and_modify(|held| {
                if checkpoint.version > held.version {
                    *held = checkpoint.clone();
                }
            })
            .or_insert_with(|| checkpoint.clone());
    }

    /// Writes a checkpoint through every tier.
    ///
    /// Returns `None` when an unchanged auto checkpoint was skipped or the
    /// state could not be serialized.
    pub async fn save(
        &self,
        state: &ExecutionState,
        checkpoint_type: CheckpointType,
        stage_phase: &str,
        label: Option<String>,
    ) -> Option<Checkpoint> {
        let run_id = state.run_id.as_str();
        let digest = state.digest();
        if checkpoint_type == CheckpointType::Auto
            && self.config.skip_unchanged_auto
            && self.last_digest.get(run_id).is_some_and(|d| *d == digest)
        {
            self.metrics.skipped_unchanged.fetch_add(1, Ordering::Relaxed);
            debug!(run_id = %run_id, "Skipped unchanged auto checkpoint");
            return None;
        }

        let version = self.next_version(run_id).await;
        let mut checkpoint = match Checkpoint::capture(state, checkpoint_type, stage_phase, version) {
            Ok(cp) => cp,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to capture checkpoint");
                return None;
            }
        };
        checkpoint.label = label;

        if let Some(fast) = &self.fast {
            if let Err(e) = fast.put(&checkpoint).await {
                self.metrics.fast_tier_failures.fetch_add(1, Ordering::Relaxed);
                warn!(run_id = %run_id, tier = fast.name(), error = %e, "Fast checkpoint tier write failed");
            }
        }

        if let Some(durable) = &self.durable {
            if !durable
                .save_state(run_id, &state.thread_id, &state.user_id, state)
                .await
            {
                self.metrics.durable_tier_failures.fetch_add(1, Ordering::Relaxed);
                warn!(run_id = %run_id, "Durable state store write failed");
            }
        }

        Self::keep_newest(&self.fallback, run_id.to_string(), &checkpoint);
        if checkpoint_type == CheckpointType::PhaseTransition {
            Self::keep_newest(
                &self.phase_latest,
                (run_id.to_string(), stage_phase.to_string()),
                &checkpoint,
            );
        }
        self.last_digest.insert(run_id.to_string(), digest);
        self.metrics.written.fetch_add(1, Ordering::Relaxed);

        info!(
            run_id = %run_id,
            checkpoint_type = %checkpoint_type,
            stage_phase = %stage_phase,
            version,
            "Checkpoint written"
        );
        Some(checkpoint)
    }

    /// Latest checkpoint from the fast tier. Read failures are logged.
    pub async fn fast_latest(&self, run_id: &str) -> Option<Checkpoint> {
        let fast = self.fast.as_ref()?;
        match fast.latest(run_id).await {
            Ok(cp) => cp,
            Err(e) => {
                warn!(run_id = %run_id, tier = fast.name(), error = %e, "Fast checkpoint tier read failed");
                None
            }
        }
    }

    /// Latest state from the durable store.
    pub async fn durable_latest(&self, run_id: &str) -> Option<ExecutionState> {
        self.durable.as_ref()?.load_state(run_id).await
    }

    /// Latest checkpoint held in process.
    #[must_use]
    pub fn fallback_latest(&self, run_id: &str) -> Option<Checkpoint> {
        self.fallback.get(run_id).map(|c| c.value().clone())
    }

    /// Latest phase-transition checkpoint for a stage boundary.
    #[must_use]
    pub fn latest_for_phase(&self, run_id: &str, stage_phase: &str) -> Option<Checkpoint> {
        self.phase_latest
            .get(&(run_id.to_string(), stage_phase.to_string()))
            .map(|c| c.value().clone())
    }

    /// Latest phase-transition checkpoint per boundary, ordered by version.
    #[must_use]
    pub fn phase_transitions(&self, run_id: &str) -> Vec<Checkpoint> {
        let mut checkpoints: Vec<_> = self
            .phase_latest
            .iter()
            .filter(|e| e.key().0 == run_id)
            .map(|e| e.value().clone())
            .collect();
        checkpoints.sort_by_key(|c| c.version);
        checkpoints
    }

    /// Highest version written for a run.
    #[must_use]
    pub fn latest_version(&self, run_id: &str) -> Option<u64> {
        self.versions.get(run_id).map(|v| *v.value())
    }

    /// Drops in-process bookkeeping for a run. Tiers are left untouched.
    pub fn forget(&self, run_id: &str) {
        self.fallback.remove(run_id);
        self.last_digest.remove(run_id);
        self.phase_latest.retain(|(r, _), _| r != run_id);
    }
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("config", &self.config)
            .field("fast", &self.fast.as_ref().map(|t| t.name().to_string()))
            .field("durable", &self.durable.is_some())
            .field("runs", &self.fallback.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{
        InMemoryCheckpointTier, InMemoryStateStore, JsonFileCheckpointTier, MockStateStore,
    };
    use crate::context::{DataResult, RunIdentity, TriageResult};
    use crate::errors::CheckpointError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct BrokenTier;

    #[async_trait]
    impl CheckpointTier for BrokenTier {
        fn name(&self) -> &str {
            "broken"
        }
        async fn put(&self, _c: &Checkpoint) -> Result<(), CheckpointError> {
            Err(CheckpointError::Tier {
                tier: "broken".into(),
                reason: "disk full".into(),
            })
        }
        async fn latest(&self, _r: &str) -> Result<Option<Checkpoint>, CheckpointError> {
            Err(CheckpointError::Tier {
                tier: "broken".into(),
                reason: "offline".into(),
            })
        }
        async fn list(&self, _r: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
            Ok(Vec::new())
        }
        async fn remove_run(&self, _r: &str) -> Result<(), CheckpointError> {
            Ok(())
        }
    }

    fn state(run_id: &str) -> ExecutionState {
        ExecutionState::new(&RunIdentity::new("u", "t", run_id), "req")
    }

    #[tokio::test]
    async fn test_versions_increase_per_run() {
        let store = CheckpointStore::new(CheckpointConfig::default());
        let a = store.save(&state("a"), CheckpointType::Manual, "manual", None).await.unwrap();
        let b = store.save(&state("a"), CheckpointType::Manual, "manual", None).await.unwrap();
        let c = store.save(&state("b"), CheckpointType::Manual, "manual", None).await.unwrap();

        assert_eq!((a.version, b.version, c.version), (1, 2, 1));
        assert_eq!(store.latest_version("a"), Some(2));
        assert_eq!(store.fallback_latest("a").unwrap().checkpoint_id, b.checkpoint_id);
    }

    #[tokio::test]
    async fn test_writes_reach_every_tier() {
        let fast = Arc::new(InMemoryCheckpointTier::new());
        let durable = Arc::new(InMemoryStateStore::new());
        let store = CheckpointStore::new(CheckpointConfig::default())
            .with_fast_tier(fast.clone())
            .with_durable_store(durable.clone());

        let mut s = state("run-1");
        s.triage_result = Some(TriageResult::new("billing", 0.9));
        store.save(&s, CheckpointType::PhaseTransition, "triage", None).await.unwrap();

        assert_eq!(store.fast_latest("run-1").await.unwrap().restore_state().unwrap(), s);
        assert_eq!(store.durable_latest("run-1").await, Some(s.clone()));
        assert_eq!(store.latest_for_phase("run-1", "triage").unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_tier_failures_are_absorbed() {
        let mut durable = MockStateStore::new();
        durable.expect_save_state().returning(|_, _, _, _| false);
        let store = CheckpointStore::new(CheckpointConfig::default())
            .with_fast_tier(Arc::new(BrokenTier))
            .with_durable_store(Arc::new(durable));

        let cp = store.save(&state("r"), CheckpointType::PhaseTransition, "triage", None).await;
        assert!(cp.is_some());
        assert_eq!(store.metrics().fast_tier_failures(), 1);
        assert_eq!(store.metrics().durable_tier_failures(), 1);
        assert!(store.fallback_latest("r").is_some());
        assert!(store.fast_latest("r").await.is_none());
    }

    #[tokio::test]
    async fn test_unchanged_auto_checkpoint_skipped() {
        let store = CheckpointStore::new(CheckpointConfig::default());
        let mut s = state("r");

        assert!(store.save(&s, CheckpointType::Auto, "running", None).await.is_some());
        assert!(store.save(&s, CheckpointType::Auto, "running", None).await.is_none());
        assert_eq!(store.metrics().skipped_unchanged(), 1);

        s.data_result = Some(DataResult::new(1.0, 2));
        assert!(store.save(&s, CheckpointType::Auto, "running", None).await.is_some());
        assert!(store.save(&s, CheckpointType::Manual, "manual", Some("pin".into())).await.is_some());
    }

    #[tokio::test]
    async fn test_latest_phase_checkpoint_wins() {
        let store = CheckpointStore::new(CheckpointConfig::default());
        let s = state("r");
        store.save(&s, CheckpointType::PhaseTransition, "triage", None).await;
        store.save(&s, CheckpointType::PhaseTransition, "data", None).await;
        store.save(&s, CheckpointType::PhaseTransition, "triage", None).await;

        let phases: Vec<_> = store
            .phase_transitions("r")
            .into_iter()
            .map(|c| (c.stage_phase, c.version))
            .collect();
        assert_eq!(phases, vec![("data".to_string(), 2), ("triage".to_string(), 3)]);

        store.forget("r");
        assert!(store.phase_transitions("r").is_empty());
        assert!(store.fallback_latest("r").is_none());
    }

    #[tokio::test]
    async fn test_versions_continue_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let before = CheckpointStore::new(CheckpointConfig::default())
            .with_fast_tier(Arc::new(JsonFileCheckpointTier::new(dir.path())));
        let s = state("run-7");
        before.save(&s, CheckpointType::PhaseTransition, "triage", None).await;
        before.save(&s, CheckpointType::Manual, "manual1", None).await;
        before.save(&s, CheckpointType::Manual, "manual2", None).await;
        drop(before);

        let after = CheckpointStore::new(CheckpointConfig::default())
            .with_fast_tier(Arc::new(JsonFileCheckpointTier::new(dir.path())));
        let written = after
            .save(&s, CheckpointType::PhaseTransition, "data", None)
            .await
            .unwrap();

        assert_eq!(written.version, 4);
        let latest = after.fast_latest("run-7").await.unwrap();
        assert_eq!(latest.stage_phase, "data");
        assert_eq!(latest.version, 4);
        assert_eq!(after.latest_version("run-7"), Some(4));
    }

    #[test]
    fn test_fallback_keeps_highest_version() {
        let store = CheckpointStore::new(CheckpointConfig::default());
        let s = state("r");
        let newer = Checkpoint::capture(&s, CheckpointType::PhaseTransition, "data", 5).unwrap();
        let older = Checkpoint::capture(&s, CheckpointType::Auto, "running", 4).unwrap();

        CheckpointStore::keep_newest(&store.fallback, "r".to_string(), &newer);
        CheckpointStore::keep_newest(&store.fallback, "r".to_string(), &older);

        let held = store.fallback_latest("r").unwrap();
        assert_eq!(held.version, 5);
        assert_eq!(held.stage_phase, "data");
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_interfere() {
        let store = Arc::new(CheckpointStore::new(CheckpointConfig::default()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let s = state(&format!("run-{i}"));
                    for _ in 0..5 {
                        store.save(&s, CheckpointType::Manual, "manual", None).await;
                    }
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        for i in 0..8 {
            assert_eq!(store.latest_version(&format!("run-{i}")), Some(5));
        }
    }
}
