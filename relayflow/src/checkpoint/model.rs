//! Persisted checkpoint records.

use crate::context::ExecutionState;
use crate::errors::CheckpointError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why a checkpoint was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    /// Periodic background checkpoint.
    Auto,
    /// Written at a stage boundary.
    PhaseTransition,
    /// Requested explicitly.
    Manual,
}

impl fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::PhaseTransition => write!(f, "phase_transition"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// An immutable snapshot of execution state.
///
/// Later checkpoints supersede earlier ones; `version` increases
/// monotonically per `run_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Unique checkpoint ID.
    pub checkpoint_id: String,
    /// Run the checkpoint belongs to.
    pub run_id: String,
    /// Thread ID.
    pub thread_id: String,
    /// User ID.
    pub user_id: String,
    /// Checkpoint kind.
    pub checkpoint_type: CheckpointType,
    /// Stage boundary (or other phase label) the snapshot was taken at.
    pub stage_phase: String,
    /// Serialized [`ExecutionState`].
    pub state_snapshot: serde_json::Value,
    /// Whether recovery may resume from this checkpoint.
    pub is_recovery_point: bool,
    /// When the checkpoint was taken.
    pub created_at: DateTime<Utc>,
    /// Per-run version.
    pub version: u64,
    /// Optional label for manual checkpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Checkpoint {
    /// Captures a state snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialized.
    pub fn capture(
        state: &ExecutionState,
        checkpoint_type: CheckpointType,
        stage_phase: impl Into<String>,
        version: u64,
    ) -> Result<Self, CheckpointError> {
        Ok(Self {
            checkpoint_id: Uuid::new_v4().to_string(),
            run_id: state.run_id.clone(),
            thread_id: state.thread_id.clone(),
            user_id: state.user_id.clone(),
            checkpoint_type,
            stage_phase: stage_phase.into(),
            state_snapshot: state.to_snapshot()?,
            is_recovery_point: true,
            created_at: Utc::now(),
            version,
            label: None,
        })
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Deserializes the snapshot back into a state.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot is malformed.
    pub fn restore_state(&self) -> Result<ExecutionState, CheckpointError> {
        Ok(ExecutionState::from_snapshot(self.state_snapshot.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunIdentity, TriageResult};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_capture_and_restore() {
        let mut state = ExecutionState::new(&RunIdentity::new("u", "t", "run-9"), "hello");
        state.triage_result = Some(TriageResult::new("billing", 0.9));

        let cp = Checkpoint::capture(&state, CheckpointType::PhaseTransition, "triage", 3).unwrap();
        assert_eq!(cp.run_id, "run-9");
        assert_eq!(cp.version, 3);
        assert!(cp.is_recovery_point);
        assert_eq!(cp.restore_state().unwrap(), state);
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let state = ExecutionState::new(&RunIdentity::new("u", "t", "r"), "hi");
        let cp = Checkpoint::capture(&state, CheckpointType::Manual, "manual", 1)
            .unwrap()
            .with_label("before deploy");
        let json = serde_json::to_value(&cp).unwrap();

        for key in [
            "checkpointId",
            "runId",
            "threadId",
            "userId",
            "checkpointType",
            "stagePhase",
            "stateSnapshot",
            "isRecoveryPoint",
            "createdAt",
            "version",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["checkpointType"], "manual");

        let back: Checkpoint = serde_json::from_value(json).unwrap();
        assert_eq!(back, cp);
    }
}
