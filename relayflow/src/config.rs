//! Aggregate configuration.
//!
//! Every component config is a plain serde struct with defaults, so a
//! partial JSON document only overrides what it names:
//!
//! ```rust,ignore
//! let config = RelayflowConfig::from_json_str(r#"{"retry": {"max_retries": 5}}"#)?;
//! let orchestrator = config.build_orchestrator(registry);
//! ```

use crate::checkpoint::{
    CheckpointConfig, CheckpointStore, InMemoryCheckpointTier, JsonFileCheckpointTier,
    RecoveryConfig,
};
use crate::errors::RelayflowError;
use crate::events::{EventChannelConfig, Transport};
use crate::pipeline::{Orchestrator, OrchestratorConfig};
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, RetryConfig};
use crate::session::{SessionConfig, SessionCoordinator};
use crate::stages::StageRegistry;
use crate::validation::{HandoffValidator, ValidatorConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for every relayflow component.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayflowConfig {
    /// Per-stage retry policy.
    pub retry: RetryConfig,
    /// Default breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Event delivery.
    pub events: EventChannelConfig,
    /// Checkpoint tiers and auto-checkpoint cadence.
    pub checkpoint: CheckpointConfig,
    /// Recovery SLA and crash detection.
    pub recovery: RecoveryConfig,
    /// Handoff validation thresholds.
    pub validator: ValidatorConfig,
    /// Orchestrator limits.
    pub orchestrator: OrchestratorConfig,
    /// Session pipeline shape.
    pub session: SessionConfig,
}

impl RelayflowConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`RelayflowError::Serialization`] for malformed JSON and
    /// [`RelayflowError::Config`] for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, RelayflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`RelayflowError::Config`] naming the first bad field.
    pub fn validate(&self) -> Result<(), RelayflowError> {
        let fail = |message: &str| Err(RelayflowError::Config(message.to_string()));

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return fail("retry.max_delay_ms must be >= retry.base_delay_ms");
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return fail("circuit_breaker.failure_threshold must be >= 1");
        }
        if self.circuit_breaker.half_open_max_probes == 0 {
            return fail("circuit_breaker.half_open_max_probes must be >= 1");
        }
        if self.checkpoint.auto_interval_secs == 0 {
            return fail("checkpoint.auto_interval_secs must be >= 1");
        }
        if self.recovery.sla_ms == 0 {
            return fail("recovery.sla_ms must be >= 1");
        }
        if self.recovery.heartbeat_timeout_secs == 0 {
            return fail("recovery.heartbeat_timeout_secs must be >= 1");
        }
        let unit = 0.0..=1.0;
        if !unit.contains(&self.validator.min_triage_confidence)
            || !unit.contains(&self.validator.confidence_warning_threshold)
            || !unit.contains(&self.validator.data_quality_warning_threshold)
        {
            return fail("validator thresholds must be within [0, 1]");
        }
        if self.orchestrator.stage_timeout_ms == 0 {
            return fail("orchestrator.stage_timeout_ms must be >= 1");
        }
        if self.orchestrator.history_capacity == 0 {
            return fail("orchestrator.history_capacity must be >= 1");
        }
        if self.session.stages.is_empty() {
            return fail("session.stages must not be empty");
        }
        if let Some(stage) = self
            .session
            .optional_stages
            .iter()
            .find(|s| !self.session.stages.contains(s))
        {
            return Err(RelayflowError::Config(format!(
                "session.optional_stages names unknown stage '{stage}'"
            )));
        }
        Ok(())
    }

    /// Builds a checkpoint store with the configured fast tier.
    #[must_use]
    pub fn build_checkpoint_store(&self) -> CheckpointStore {
        let store = CheckpointStore::new(self.checkpoint.clone());
        match &self.checkpoint.file_tier_dir {
            Some(dir) => store.with_fast_tier(Arc::new(JsonFileCheckpointTier::new(dir))),
            None => store.with_fast_tier(Arc::new(InMemoryCheckpointTier::new())),
        }
    }

    /// Builds an orchestrator over `registry` with fresh collaborators.
    #[must_use]
    pub fn build_orchestrator(&self, registry: Arc<StageRegistry>) -> Orchestrator {
        Orchestrator::new(registry, self.orchestrator.clone())
            .with_breakers(Arc::new(CircuitBreakerRegistry::new(
                self.circuit_breaker.clone(),
            )))
            .with_retry_config(self.retry.clone())
            .with_validator(Arc::new(HandoffValidator::new(self.validator.clone())))
            .with_checkpoint_store(Arc::new(self.build_checkpoint_store()))
    }

    /// Builds a session coordinator over `registry`.
    #[must_use]
    pub fn build_coordinator(
        &self,
        registry: Arc<StageRegistry>,
        transport: Arc<dyn Transport>,
    ) -> SessionCoordinator {
        SessionCoordinator::new(self.build_orchestrator(registry), transport, self.session.clone())
            .with_recovery_config(self.recovery.clone())
            .with_event_config(self.events.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoOpTransport;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = RelayflowConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.session.stages.len(), 5);
    }

    #[test]
    fn test_partial_json_overrides_only_named_fields() {
        let config = RelayflowConfig::from_json_str(
            r#"{
                "retry": {"max_retries": 5},
                "circuit_breaker": {"failure_threshold": 3},
                "session": {"optional_stages": ["data"]}
            }"#,
        )
        .unwrap();

        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, RetryConfig::default().base_delay_ms);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.session.optional_stages, vec!["data".to_string()]);
        assert_eq!(config.recovery, RecoveryConfig::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = RelayflowConfig::from_json_str(r#"{"circuit_breaker": {"failure_threshold": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, RelayflowError::Config(_)));
        assert!(err.to_string().contains("failure_threshold"));

        let err = RelayflowConfig::from_json_str(r#"{"validator": {"min_triage_confidence": 1.5}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("[0, 1]"));

        let err = RelayflowConfig::from_json_str(r#"{"session": {"optional_stages": ["ghost"]}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_malformed_json_is_a_serialization_error() {
        let err = RelayflowConfig::from_json_str("{not json").unwrap_err();
        assert_eq!(err.code(), "RELAY-013-SERIALIZATION");
    }

    #[test]
    fn test_builds_file_tier_when_directory_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RelayflowConfig::default();
        config.checkpoint.file_tier_dir = Some(dir.path().display().to_string());

        let store = config.build_checkpoint_store();
        assert!(store.fast_tier().is_some());

        let coordinator = config.build_coordinator(Arc::new(StageRegistry::new()), Arc::new(NoOpTransport));
        assert_eq!(coordinator.orchestrator().config().retry_budget, 10);
    }
}
