//! Per-request execution state.

use super::outputs::{
    ActionPlanResult, DataResult, OptimizationResult, ReportResult, TriageResult,
};
use super::{RunIdentity, StateField};
use crate::errors::DataConflictError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The state carried through one pipeline run.
///
/// Each typed output has exactly one producing stage. Stages work on a
/// private copy; the orchestrator copies back only the fields the stage
/// owns via [`ExecutionState::absorb`], which refuses to overwrite a
/// field that already holds a different value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Session ID.
    pub session_id: String,
    /// Thread ID.
    pub thread_id: String,
    /// User ID.
    pub user_id: String,
    /// Run ID.
    pub run_id: String,
    /// The original user request.
    pub user_request: String,
    /// Thread context reloaded on recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_context: Option<serde_json::Value>,
    /// Number of stages that have completed.
    #[serde(default)]
    pub step_count: u32,
    /// Triage output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_result: Option<TriageResult>,
    /// Data analysis output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_result: Option<DataResult>,
    /// Optimization output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_result: Option<OptimizationResult>,
    /// Action plan output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_plan_result: Option<ActionPlanResult>,
    /// Report output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_result: Option<ReportResult>,
}

impl ExecutionState {
    /// Creates an empty state for a request.
    #[must_use]
    pub fn new(identity: &RunIdentity, user_request: impl Into<String>) -> Self {
        Self {
            session_id: identity.session_id.clone(),
            thread_id: identity.thread_id.clone(),
            user_id: identity.user_id.clone(),
            run_id: identity.run_id.clone(),
            user_request: user_request.into(),
            ..Default::default()
        }
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> RunIdentity {
        RunIdentity {
            session_id: self.session_id.clone(),
            thread_id: self.thread_id.clone(),
            user_id: self.user_id.clone(),
            run_id: self.run_id.clone(),
        }
    }

    /// Returns true if the field holds a value.
    #[must_use]
    pub fn is_populated(&self, field: StateField) -> bool {
        match field {
            StateField::Triage => self.triage_result.is_some(),
            StateField::Data => self.data_result.is_some(),
            StateField::Optimization => self.optimization_result.is_some(),
            StateField::ActionPlan => self.action_plan_result.is_some(),
            StateField::Report => self.report_result.is_some(),
        }
    }

    /// Returns every populated field, in pipeline order.
    #[must_use]
    pub fn populated_fields(&self) -> Vec<StateField> {
        StateField::ALL
            .into_iter()
            .filter(|f| self.is_populated(*f))
            .collect()
    }

    /// Returns true if two states hold the same value for a field.
    fn field_eq(&self, other: &Self, field: StateField) -> bool {
        match field {
            StateField::Triage => self.triage_result == other.triage_result,
            StateField::Data => self.data_result == other.data_result,
            StateField::Optimization => self.optimization_result == other.optimization_result,
            StateField::ActionPlan => self.action_plan_result == other.action_plan_result,
            StateField::Report => self.report_result == other.report_result,
        }
    }

    /// Copies one field from another state, replacing whatever is here.
    pub fn copy_field_from(&mut self, other: &Self, field: StateField) {
        match field {
            StateField::Triage => self.triage_result.clone_from(&other.triage_result),
            StateField::Data => self.data_result.clone_from(&other.data_result),
            StateField::Optimization => {
                self.optimization_result.clone_from(&other.optimization_result);
            }
            StateField::ActionPlan => {
                self.action_plan_result.clone_from(&other.action_plan_result);
            }
            StateField::Report => self.report_result.clone_from(&other.report_result),
        }
    }

    /// Copies the owned fields a stage populated on its private copy.
    ///
    /// Returns the fields that were newly written.
    ///
    /// # Errors
    ///
    /// Returns `DataConflictError` if an owned field is already populated
    /// here with a different value.
    pub fn absorb(
        &mut self,
        produced: &Self,
        owned: &[StateField],
        stage: &str,
    ) -> Result<Vec<StateField>, DataConflictError> {
        for field in owned {
            if produced.is_populated(*field)
                && self.is_populated(*field)
                && !self.field_eq(produced, *field)
            {
                return Err(DataConflictError::new(field.key(), stage));
            }
        }

        let mut written = Vec::new();
        for field in owned {
            if produced.is_populated(*field) && !self.is_populated(*field) {
                self.copy_field_from(produced, *field);
                written.push(*field);
            }
        }
        Ok(written)
    }

    /// Fills fields that are empty here from another state.
    ///
    /// Used by recovery to merge the first hit per field across tiers.
    pub fn fill_missing_from(&mut self, other: &Self) -> Vec<StateField> {
        let mut filled = Vec::new();
        for field in StateField::ALL {
            if !self.is_populated(field) && other.is_populated(field) {
                self.copy_field_from(other, field);
                filled.push(field);
            }
        }
        filled
    }

    /// Serializes the state to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Restores a state from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not describe a state.
    pub fn from_snapshot(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Returns a hex SHA-256 digest of the serialized state.
    ///
    /// Equal states always produce equal digests.
    #[must_use]
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}
